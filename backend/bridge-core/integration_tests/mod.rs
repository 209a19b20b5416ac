//! End-to-end bridge tests: a real listener and dispatcher on one side,
//! a real connector on the other, loopback TCP in between.

mod helpers;
mod resilience;
mod roundtrip;
