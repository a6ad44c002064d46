
#[cfg(test)]
pub mod mutation_tests;

#[cfg(test)]
pub mod export_tests;
