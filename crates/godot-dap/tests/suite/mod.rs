// Consolidated integration test suite, compiled by `tests/tests.rs`.
mod breakpoint_replay;
mod dap_session;
mod object_fetch;
mod protocol;
mod scopes;
mod stepping;
