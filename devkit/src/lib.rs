/*!
# nvme-scan devkit - test doubles for hardware-free testing

- `ScriptedGateway`: replays canned command output, records what was asked
- `FixtureHost`: renders a fake host's `find`/`udevadm`/`lspci`/`nvme` output
- `RecordingLogger` and `TestHarness`: capture the logging hook, wire a collector
*/

pub mod fixture;
pub mod gateway_stub;
pub mod test_utils;

pub use fixture::{FixtureController, FixtureHost, FixtureNamespace};
pub use gateway_stub::ScriptedGateway;
pub use test_utils::{RecordingLogger, TestHarness};
