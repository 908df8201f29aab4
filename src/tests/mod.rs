//! Cross-module lifecycle suites exercising the three singletons together.

#[cfg(test)]
mod lifecycle_tests;

#[cfg(test)]
mod persistence_tests;
