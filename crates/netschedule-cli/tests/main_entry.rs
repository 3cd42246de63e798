//! Integration tests for the `nsadmin` binary entry point.
//!
//! Covers help output, target-selection usage errors and the exit code for
//! an unreachable server.

use std::net::TcpListener;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use predicates::str::contains;

#[test]
fn help_lists_the_verbs() {
    let mut command = cargo_bin_cmd!("nsadmin");
    command.arg("--help");
    command
        .assert()
        .success()
        .stdout(contains("serverinfo").and(contains("drain")));
}

#[test]
fn drain_rejects_the_netcache_selector() {
    let mut command = cargo_bin_cmd!("nsadmin");
    command.args(["drain", "--netcache"]);
    command
        .assert()
        .code(2)
        .stderr(contains("--netschedule"));
}

#[test]
fn unreachable_server_exits_with_connection_failure() {
    let port = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind probe port");
        listener.local_addr().expect("local addr").port()
    };
    let mut command = cargo_bin_cmd!("nsadmin");
    command.args(["--server", &format!("127.0.0.1:{port}"), "drain"]);
    command
        .assert()
        .code(3)
        .stderr(contains("failed to connect"));
}
