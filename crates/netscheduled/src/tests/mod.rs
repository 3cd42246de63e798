//! Test suites for the NetSchedule server.

mod lib_api;
mod support;
