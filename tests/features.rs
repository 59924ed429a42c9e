use std::process::Command;

use assert_cmd::prelude::*;
use assert_fs::{prelude::*, TempDir};
use predicates::prelude::*;

fn tt() -> Command {
    Command::cargo_bin("tt").unwrap()
}

fn path_with(temp: &TempDir, name: &str, contents: &str) -> String {
    let f = temp.child(name);
    f.write_str(contents).unwrap();
    f.path().to_str().unwrap().to_string()
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.unwrap();
    String::from_utf8(output.stdout).unwrap()
}

struct Pets {
    _temp: TempDir,
    first: String,
    second: String,
}

fn pets() -> Pets {
    let temp = TempDir::new().unwrap();
    let first = path_with(&temp, "first.txt", "cat\ndog\nbird\n");
    let second = path_with(&temp, "second.txt", "dog\nbird\nfish\n");
    Pets { _temp: temp, first, second }
}

#[test]
fn missing_mode_prints_usage_and_fails() {
    tt().assert().failure().code(1).stdout(predicate::str::contains("Usage"));
}

#[test]
fn two_modes_at_once_are_rejected() {
    let p = pets();
    tt().args(["-u", "-i", &p.first]).assert().failure();
}

#[test]
fn fail_on_missing_file() {
    tt().args(["-u", "no-such-file.txt"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no-such-file.txt"));
}

#[test]
fn mode_without_files_fails() {
    tt().arg("-i").assert().failure();
}

#[test]
fn union_prints_every_token_once_in_first_seen_order() {
    let p = pets();
    assert_eq!(stdout_of(tt().args(["-u", &p.first, &p.second])), "cat\ndog\nbird\nfish\n");
}

#[test]
fn intersection_prints_tokens_in_every_file() {
    let p = pets();
    assert_eq!(stdout_of(tt().args(["-i", &p.first, &p.second])), "dog\nbird\n");
}

#[test]
fn difference_prints_tokens_missing_from_some_file() {
    let p = pets();
    assert_eq!(stdout_of(tt().args(["-d", &p.first, &p.second])), "cat\nfish\n");
}

#[test]
fn report_goes_to_stderr() {
    let p = pets();
    tt().args(["-u", &p.first, &p.second])
        .assert()
        .success()
        .stderr(predicate::str::contains("** Token Report **"))
        .stderr(predicate::str::contains("Lines scanned: 6"))
        .stderr(predicate::str::contains("Tokens written: 4"));
}

#[test]
fn count_prefixes_union_tokens_with_their_occurrences() {
    let temp = TempDir::new().unwrap();
    let a = path_with(&temp, "a.txt", "x\ny\nx\n");
    let b = path_with(&temp, "b.txt", "y\nx\n");
    assert_eq!(stdout_of(tt().args(["-u", "--count", &a, &b])), "3: x\n2: y\n");
}

#[test]
fn count_needs_union() {
    let p = pets();
    tt().args(["-i", "--count", &p.first, &p.second]).assert().failure();
}

#[test]
fn null_writes_nothing_but_still_reports() {
    let p = pets();
    tt().args(["-u", "--null", &p.first, &p.second])
        .assert()
        .success()
        .stdout("")
        .stderr(predicate::str::contains("Tokens written: 4"));
}

#[test]
fn match_and_capture_shape_the_tokens() {
    let temp = TempDir::new().unwrap();
    let a = path_with(&temp, "a.log", "  id=1 ok\nnoise\n id=2 ok \n");
    let b = path_with(&temp, "b.log", "id=2 ok\nid=3 ok\n");
    let args = ["--trim", "--match", "ok$", "--capture", r"id=(\d+)"];
    assert_eq!(stdout_of(tt().arg("-i").args(args).args([&a, &b])), "2\n");
    assert_eq!(stdout_of(tt().arg("-u").args(args).args([&a, &b])), "1\n2\n3\n");
}

#[test]
fn bad_patterns_are_rejected() {
    let p = pets();
    tt().args(["-u", "--match", "(", &p.first]).assert().failure();
    tt().args(["-u", "--capture", "no groups", &p.first]).assert().failure();
}

#[test]
fn threaded_builds_agree_with_the_default() {
    let p = pets();
    let expected = "dog\nbird\n";
    assert_eq!(stdout_of(tt().args(["-i", "--parallel", &p.first, &p.second])), expected);
    assert_eq!(
        stdout_of(tt().args(["-i", "--chunk-size", "4", "--workers", "3", &p.first, &p.second])),
        expected
    );
}

#[test]
fn bloom_filters_give_the_same_answer_on_small_inputs() {
    let p = pets();
    assert_eq!(
        stdout_of(tt().args(["-d", "--estimated-tokens", "1000", &p.first, &p.second])),
        "cat\nfish\n"
    );
    tt().args(["-d", "--estimate", &p.first, &p.second])
        .assert()
        .success()
        .stdout("cat\nfish\n")
        .stderr(predicate::str::contains("Filter size (tokens): 6"));
}

#[test]
fn crlf_and_utf16_inputs_are_read_as_plain_lines() {
    let temp = TempDir::new().unwrap();
    let crlf = path_with(&temp, "crlf.txt", "cat\r\ndog\r\n");
    let utf16 = temp.child("utf16.txt");
    let mut bytes = vec![0xff, 0xfe];
    for unit in "dog\ncat\n".encode_utf16() {
        bytes.extend_from_slice(&unit.to_le_bytes());
    }
    utf16.write_binary(&bytes).unwrap();
    let utf16 = utf16.path().to_str().unwrap().to_string();
    assert_eq!(stdout_of(tt().args(["-i", &crlf, &utf16])), "cat\ndog\n");
}
