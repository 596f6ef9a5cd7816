// Emission tests
// Scenario-level assertions on the generated C unit.

#[path = "../integration/common/mod.rs"]
pub mod common;

mod _01_boxing;
mod _02_loops;
mod _03_dispatch;
mod _04_partial_success;
mod _05_generators;
mod _06_imports;
