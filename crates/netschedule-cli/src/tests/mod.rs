//! Test suites for the `nsadmin` runtime.

mod support;
mod unit;
