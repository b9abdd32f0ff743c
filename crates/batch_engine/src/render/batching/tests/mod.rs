//! End-to-end tests of the batching system against the headless device

mod pool_scenarios;
