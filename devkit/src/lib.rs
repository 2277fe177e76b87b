/*!
# scanward devkit - fakes and helpers for tests

- In-memory scanner, discovery and snapshot store gateways
- Record builders around a fixed clock
- A harness running complete cycles against the fakes
*/

pub mod fakes;
pub mod fixtures;
pub mod harness;

pub use fakes::{FakeDiscovery, FakeScanner, MemoryStore, ScannerCall};
pub use harness::{init_tracing, CycleHarness};
