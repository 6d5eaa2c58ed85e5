pub mod fixtures;

#[cfg(test)]
mod quota_tests;
