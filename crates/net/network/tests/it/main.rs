//! Retrieval integration tests

mod distributor;
mod pool;
mod retrieval;

const fn main() {}
