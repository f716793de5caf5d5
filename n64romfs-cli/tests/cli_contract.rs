//! Integration tests for core CLI contract behavior.
//!
//! Device tests run against the in-memory emulator served on a loopback
//! socket and reach it with `--remote`.

use {
    n64romfs::emulator::Emulator,
    predicates::prelude::*,
    std::{fs, net::SocketAddrV4, path::Path},
    tempfile::{TempDir, tempdir},
};

const V64_HEADER: [u8; 8] = [0x37, 0x80, 0x40, 0x12, 0x00, 0x00, 0x0F, 0x00];
const Z64_HEADER: [u8; 8] = [0x80, 0x37, 0x12, 0x40, 0x00, 0x00, 0x00, 0x0F];

/// Command isolated from the user's environment and config files.
fn cli_cmd(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("n64romfs");
    for var in [
        "N64ROMFS_PORT",
        "N64ROMFS_REMOTE",
        "N64ROMFS_TIMEOUT",
        "N64ROMFS_NON_INTERACTIVE",
    ] {
        cmd.env_remove(var);
    }
    cmd.current_dir(home)
        .env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env("N64ROMFS_LANG", "en")
        .env("NO_COLOR", "1");
    cmd
}

/// Command pointed at `addr` in non-interactive mode.
fn device_cmd(home: &Path, addr: SocketAddrV4) -> assert_cmd::Command {
    let mut cmd = cli_cmd(home);
    cmd.args(["--remote", &addr.to_string(), "--non-interactive"]);
    cmd
}

fn setup() -> (TempDir, Emulator, SocketAddrV4) {
    let home = tempdir().expect("tempdir should be created");
    let device = Emulator::new();
    device.insert_dir("/roms");
    device.insert_dir("/saves");
    device.insert_file("/roms/mario.z64", &Z64_HEADER);
    let addr = device.spawn_tcp().expect("emulator should listen");
    (home, device, addr)
}

#[test]
fn help_exits_zero_and_writes_stdout_only() {
    let home = tempdir().expect("tempdir should be created");
    cli_cmd(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("n64romfs"))
        .stderr(predicate::str::is_empty());
}

#[test]
fn version_exits_zero() {
    let home = tempdir().expect("tempdir should be created");
    cli_cmd(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("n64romfs"));
}

#[test]
fn completions_need_no_device() {
    let home = tempdir().expect("tempdir should be created");
    cli_cmd(home.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("n64romfs"));
}

#[test]
fn exit_code_two_for_unknown_command() {
    let home = tempdir().expect("tempdir should be created");
    cli_cmd(home.path())
        .arg("unknown-command-xyz")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn exit_code_two_for_malformed_remote() {
    let home = tempdir().expect("tempdir should be created");
    cli_cmd(home.path())
        .args(["--remote", "nope", "ls"])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("malformed"));
}

#[test]
fn exit_code_two_for_invalid_remote_address() {
    let home = tempdir().expect("tempdir should be created");
    cli_cmd(home.path())
        .args(["--remote", "300.0.0.1:6464", "ls"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("invalid"));
}

#[test]
fn list_ports_json_returns_valid_json() {
    let home = tempdir().expect("tempdir should be created");
    let output = cli_cmd(home.path())
        .args(["list-ports", "--json"])
        .output()
        .expect("command should execute");
    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert!(parsed.is_array());
}

#[test]
fn rom_classifies_byte_swapped_image() {
    let home = tempdir().expect("tempdir should be created");
    let file = home.path().join("game.v64");
    fs::write(&file, V64_HEADER).expect("write rom");

    let output = cli_cmd(home.path())
        .args(["rom", "--json"])
        .arg(&file)
        .output()
        .expect("command should execute");
    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["format"], "V64");
    assert_eq!(parsed["needs_conversion"], true);
}

#[test]
fn rom_missing_file_fails_with_clean_stdout() {
    let home = tempdir().expect("tempdir should be created");
    cli_cmd(home.path())
        .args(["rom", "--json", "missing.z64"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[test]
fn ls_json_lists_device_entries() {
    let (home, _device, addr) = setup();
    let output = device_cmd(home.path(), addr)
        .args(["ls", "/roms", "--json"])
        .output()
        .expect("command should execute");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    let entries = parsed.as_array().expect("array");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["name"], "mario.z64");
    assert_eq!(entries[0]["size"], 8);
    assert_eq!(entries[0]["is_directory"], false);
}

#[test]
fn ls_missing_directory_fails() {
    let (home, _device, addr) = setup();
    device_cmd(home.path(), addr)
        .args(["ls", "/nope"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("/nope"));
}

#[test]
fn put_then_get_round_trips_file() {
    let (home, device, addr) = setup();
    let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(home.path().join("save.eep"), &data).expect("write local");

    device_cmd(home.path(), addr)
        .args(["put", "save.eep", "--to", "/saves"])
        .assert()
        .success();
    assert_eq!(device.file("/saves/save.eep").as_deref(), Some(data.as_slice()));

    device_cmd(home.path(), addr)
        .args(["get", "/saves/save.eep", "-o", "copy.eep"])
        .assert()
        .success();
    assert_eq!(fs::read(home.path().join("copy.eep")).expect("read copy"), data);
}

#[test]
fn put_fix_rom_uploads_canonical_order() {
    let (home, device, addr) = setup();
    fs::write(home.path().join("zelda.v64"), V64_HEADER).expect("write rom");

    device_cmd(home.path(), addr)
        .args(["put", "zelda.v64", "--to", "/roms", "--fix-rom"])
        .assert()
        .success();
    assert_eq!(device.file("/roms/zelda.v64").as_deref(), Some(&Z64_HEADER[..]));
}

#[test]
fn put_non_interactive_leaves_rom_unchanged_by_default() {
    let (home, device, addr) = setup();
    fs::write(home.path().join("zelda.v64"), V64_HEADER).expect("write rom");

    device_cmd(home.path(), addr)
        .args(["put", "zelda.v64", "--to", "/roms"])
        .assert()
        .success();
    assert_eq!(device.file("/roms/zelda.v64").as_deref(), Some(&V64_HEADER[..]));
}

#[test]
fn put_directory_uploads_children() {
    let (home, device, addr) = setup();
    let local = home.path().join("pack");
    fs::create_dir_all(local.join("inner")).expect("mkdir");
    fs::write(local.join("a.bin"), b"alpha").expect("write a");
    fs::write(local.join("inner").join("b.bin"), b"beta").expect("write b");

    device_cmd(home.path(), addr)
        .args(["put", "pack"])
        .assert()
        .success();
    assert_eq!(device.file("/pack/a.bin").as_deref(), Some(&b"alpha"[..]));
    assert_eq!(device.file("/pack/inner/b.bin").as_deref(), Some(&b"beta"[..]));
}

#[test]
fn put_existing_without_force_is_usage_error() {
    let (home, device, addr) = setup();
    fs::write(home.path().join("mario.z64"), b"new contents").expect("write local");

    device_cmd(home.path(), addr)
        .args(["put", "mario.z64", "--to", "/roms"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--force"));
    assert_eq!(device.file("/roms/mario.z64").as_deref(), Some(&Z64_HEADER[..]));

    device_cmd(home.path(), addr)
        .args(["put", "mario.z64", "--to", "/roms", "--force"])
        .assert()
        .success();
    assert_eq!(device.file("/roms/mario.z64").as_deref(), Some(&b"new contents"[..]));
}

#[test]
fn get_into_existing_file_needs_force() {
    let (home, _device, addr) = setup();
    fs::write(home.path().join("mario.z64"), b"keep me").expect("write local");

    device_cmd(home.path(), addr)
        .args(["get", "/roms/mario.z64"])
        .assert()
        .failure()
        .code(2);
    assert_eq!(fs::read(home.path().join("mario.z64")).expect("read"), b"keep me");
}

#[test]
fn get_directories_recursively_into_output_dir() {
    let (home, device, addr) = setup();
    device.insert_file("/saves/a.eep", b"alpha");
    device.insert_dir("/saves/sub");
    device.insert_file("/saves/sub/b.eep", b"beta");
    device.insert_dir("/saves/empty");

    device_cmd(home.path(), addr)
        .args(["get", "/roms", "/saves", "--output", "backup"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Downloaded 3 files"));

    let backup = home.path().join("backup");
    assert_eq!(fs::read(backup.join("roms/mario.z64")).expect("read rom"), Z64_HEADER);
    assert_eq!(fs::read(backup.join("saves/a.eep")).expect("read a"), b"alpha");
    assert_eq!(fs::read(backup.join("saves/sub/b.eep")).expect("read b"), b"beta");
    assert!(backup.join("saves/empty").is_dir());
}

#[test]
fn get_directory_onto_file_is_usage_error() {
    let (home, _device, addr) = setup();
    fs::write(home.path().join("plain"), b"x").expect("write local");

    device_cmd(home.path(), addr)
        .args(["get", "/roms", "-o", "plain"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("not a directory"));
    assert_eq!(fs::read(home.path().join("plain")).expect("read"), b"x");
}

#[test]
fn rm_reports_partial_failure() {
    let (home, device, addr) = setup();
    device.insert_file("/saves/a.eep", b"a");

    device_cmd(home.path(), addr)
        .args(["rm", "/roms/mario.z64", "/missing", "/saves/a.eep", "--yes"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("/missing"));
    assert!(!device.exists("/roms/mario.z64"));
    assert!(!device.exists("/saves/a.eep"));
}

#[test]
fn rm_without_yes_is_refused_non_interactively() {
    let (home, device, addr) = setup();
    device_cmd(home.path(), addr)
        .args(["rm", "/roms/mario.z64"])
        .assert()
        .failure()
        .code(2);
    assert!(device.exists("/roms/mario.z64"));
}

#[test]
fn mkdir_and_mv() {
    let (home, device, addr) = setup();
    device_cmd(home.path(), addr)
        .args(["mkdir", "/roms/n64"])
        .assert()
        .success();
    assert!(device.exists("/roms/n64"));

    device_cmd(home.path(), addr)
        .args(["mv", "/roms/mario.z64", "mario64.z64"])
        .assert()
        .success();
    assert!(device.exists("/roms/mario64.z64"));
    assert!(!device.exists("/roms/mario.z64"));
}

#[test]
fn format_needs_yes_then_empties_volume() {
    let (home, _device, addr) = setup();
    device_cmd(home.path(), addr)
        .arg("format")
        .assert()
        .failure()
        .code(2);

    device_cmd(home.path(), addr)
        .args(["format", "--yes"])
        .assert()
        .success();

    device_cmd(home.path(), addr)
        .args(["ls", "/", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::diff("[]\n"));
}

#[test]
fn info_json_reports_firmware_and_free_space() {
    let (home, device, addr) = setup();
    let output = device_cmd(home.path(), addr)
        .args(["info", "--json"])
        .output()
        .expect("command should execute");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("stdout should be JSON");
    assert_eq!(parsed["firmware"], "1.3");
    assert_eq!(parsed["transport"], "network");
    assert_eq!(parsed["free_bytes"], device.free_bytes());
}

#[test]
fn unreachable_remote_fails_with_connection_error() {
    let home = tempdir().expect("tempdir should be created");
    // Bind and drop to get a port nobody listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .expect("bind")
        .port();
    cli_cmd(home.path())
        .args(["--remote", &format!("127.0.0.1:{port}"), "--timeout", "500", "ls"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::is_empty());
}
