/*
    Integration tests for the core_engine subsystem

    Test suite covering:
    - Multi-replica convergence over a relayed mock channel
    - Causal ordering and idempotent operation application
    - Sync sequencing, buffering, and supersede semantics
    - Batched atomic writes
    - Public API guards and garbage collection
*/

pub mod harness;

pub mod engine_api_tests;
