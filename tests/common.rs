#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use walkdir::WalkDir;

pub fn hoard_cmd(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin(env!("CARGO_PKG_NAME")).expect("no hoard binary");
    cmd.arg("-C").arg(dir);
    cmd
}

/// Runs `hoard -C dir <args...>`, demands success, and hands back stdout.
pub fn run(dir: &Path, args: &[&str]) -> String {
    let output = hoard_cmd(dir)
        .args(args)
        .output()
        .expect("couldn't run hoard");
    assert!(
        output.status.success(),
        "hoard {args:?} failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).expect("hoard printed non-UTF-8")
}

pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, contents) in files {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).expect("couldn't create parent dirs");
        fs::write(&full, contents).expect("couldn't write test file");
    }
}

/// Every regular file under `root` (skipping cave metadata),
/// relative and sorted.
pub fn file_list(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .into_iter()
        .map(|e| e.expect("couldn't walk dir"))
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            e.path()
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .filter(|p| !p.starts_with(".cave/"))
        .collect();
    files.sort();
    files
}

/// A temp directory holding some caves and a hoard.
pub struct Fleet {
    pub tmp: tempfile::TempDir,
}

impl Fleet {
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().expect("couldn't make a temp dir");
        fs::create_dir(tmp.path().join("hoard")).unwrap();
        Self { tmp }
    }

    pub fn hoard_dir(&self) -> PathBuf {
        self.tmp.path().join("hoard")
    }

    pub fn cave_dir(&self, name: &str) -> PathBuf {
        self.tmp.path().join(name)
    }

    pub fn hoard(&self, args: &[&str]) -> String {
        run(&self.hoard_dir(), args)
    }

    pub fn cave(&self, name: &str, args: &[&str]) -> String {
        run(&self.cave_dir(name), args)
    }

    pub fn init_cave(&self, name: &str) {
        fs::create_dir_all(self.cave_dir(name)).unwrap();
        self.cave(name, &["cave", "init"]);
        self.cave(name, &["cave", "refresh"]);
    }

    pub fn add_remote(&self, name: &str, mount: &str, extra: &[&str]) {
        let path = self.cave_dir(name);
        let display_name = format!("{name}-name");
        let mut args = vec![
            "add_remote",
            path.to_str().unwrap(),
            display_name.as_str(),
            mount,
        ];
        args.extend_from_slice(extra);
        self.hoard(&args);
    }
}

/// The standard four-role setup most scenarios start from.
pub fn populate_repotypes(fleet: &Fleet) {
    write_files(
        &fleet.cave_dir("repo-partial"),
        &[("test.me.1", "gsadfs"), ("wat/test.me.2", "gsadf3dq")],
    );
    write_files(
        &fleet.cave_dir("repo-full"),
        &[
            ("test.me.1", "gsadfs"),
            ("test.me.4", "fwadeaewdsa"),
            ("wat/test.me.2", "gsadf3dq"),
            ("wat/test.me.3", "afaswewfas"),
        ],
    );
    write_files(
        &fleet.cave_dir("repo-backup"),
        &[("test.me.1", "gsadfs"), ("wat/test.me.3", "afaswewfas")],
    );
    write_files(
        &fleet.cave_dir("repo-incoming"),
        &[
            ("test.me.4", "fwadeaewdsa"),
            ("test.me.5", "adsfg"),
            ("wat/test.me.3", "asdgvarfa"),
            ("wat/test.me.6", "f2fwsdf"),
        ],
    );
}

/// Initializes and registers the four standard caves.
pub fn init_complex_hoard(fleet: &Fleet) {
    for repo in ["repo-partial", "repo-full", "repo-backup", "repo-incoming"] {
        fleet.init_cave(repo);
    }
    fleet.hoard(&["init"]);
    fleet.add_remote("repo-partial", "/", &[]);
    fleet.add_remote("repo-full", "/", &["--role", "full", "--fetch-new"]);
    fleet.add_remote("repo-backup", "/", &["--role", "backup"]);
    fleet.add_remote("repo-incoming", "/", &["--role", "incoming"]);
}
