use assert_cmd::Command;
use predicates::prelude::*;

fn rkite() -> Command {
  Command::cargo_bin("rkite").expect("binary")
}

#[test]
fn prints_assembly_by_default() {
  rkite()
    .arg("int main() { return 2 + 3; }")
    .assert()
    .success()
    .stdout(predicate::str::contains(".globl main"))
    .stdout(predicate::str::contains("main:"))
    .stdout(predicate::str::contains("add %rdi, %rax"));
}

#[test]
fn emits_token_listing() {
  rkite()
    .args(["--emit", "tokens", "Point p; return 0;"])
    .assert()
    .success()
    .stdout(predicate::str::contains("[Type] \"Point\""))
    .stdout(predicate::str::contains("[Ident] \"p\""))
    .stdout(predicate::str::contains("[Keyword] \"return\""))
    .stdout(predicate::str::ends_with("[Eof]\n"));
}

#[test]
fn emits_resolved_tree() {
  rkite()
    .args(["--emit", "ast", "class P { int x; } int main() { P p; return p.x; }"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Program {"))
    .stdout(predicate::str::contains("FieldAccess"));
}

#[test]
fn writes_output_file() {
  let dir = tempfile::tempdir().expect("tempdir");
  let path = dir.path().join("out.s");
  rkite()
    .arg("-o")
    .arg(&path)
    .arg("int main() { return 0; }")
    .assert()
    .success()
    .stdout(predicate::str::is_empty());

  let asm = std::fs::read_to_string(&path).expect("read output");
  assert!(asm.contains("main:"));
  assert!(asm.contains("ret"));
}

#[test]
fn reports_cycle_and_exits_with_failure() {
  rkite()
    .arg("class A { B b; } class B { A a; } int main() { return 0; }")
    .assert()
    .failure()
    .code(1)
    .stdout(predicate::str::is_empty())
    .stderr(predicate::str::contains("cyclic class layout: A -> B -> A"));
}

#[test]
fn reports_parse_error_with_token_window() {
  rkite()
    .arg("int main() { return 1 }")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("parse error"))
    .stderr(predicate::str::contains("<-- current"));
}

#[test]
fn reports_unknown_character() {
  rkite()
    .arg("int main() { return 1 @ 2; }")
    .assert()
    .code(1)
    .stderr(predicate::str::contains("lex error"))
    .stderr(predicate::str::contains("^"));
}

#[test]
fn requires_source_argument() {
  rkite().assert().failure();
}
