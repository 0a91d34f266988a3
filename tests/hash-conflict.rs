//! A third cave claiming different bytes for a known path: the pull
//! aborts (exit code 3) unless told to trust the cave.

mod common;
use common::*;

#[test]
fn conflicting_hashes_abort_unless_assumed() {
    let fleet = Fleet::new();
    write_files(
        &fleet.cave_dir("repo-partial"),
        &[("test.me.1", "gsadfs"), ("wat/test.me.2", "gsadf3dq")],
    );
    write_files(
        &fleet.cave_dir("repo-full"),
        &[("test.me.1", "gsadfs"), ("wat/test.me.2", "gsadf3dq")],
    );
    write_files(&fleet.cave_dir("repo-changed"), &[("test.me.1", "CHANGED")]);
    for repo in ["repo-partial", "repo-full", "repo-changed"] {
        fleet.init_cave(repo);
    }
    fleet.hoard(&["init"]);
    fleet.add_remote("repo-partial", "/", &[]);
    fleet.add_remote("repo-full", "/", &["--role", "full", "--fetch-new"]);
    fleet.add_remote("repo-changed", "/", &[]);
    fleet.hoard(&["contents", "pull", "repo-partial-name"]);
    fleet.hoard(&["contents", "pull", "repo-full-name"]);
    let before = fleet.hoard(&["contents", "ls", "--skip-folders"]);

    hoard_cmd(&fleet.hoard_dir())
        .args(["contents", "pull", "repo-changed-name"])
        .assert()
        .code(3)
        .stderr(predicates::str::contains(
            "conflicting file hashes at /test.me.1",
        ));
    // The aborted pull moved nothing.
    assert_eq!(fleet.hoard(&["contents", "ls", "--skip-folders"]), before);

    let res = fleet.hoard(&["contents", "pull", "repo-changed-name", "--assume-current"]);
    assert_eq!(
        res,
        "RESETTING /test.me.1\nSync'ed repo-changed-name to hoard!\nDONE\n"
    );

    // The cave's version won; the old holders now need a refresh.
    let res = fleet.hoard(&["contents", "ls", "--skip-folders"]);
    assert_eq!(
        res,
        "/test.me.1 = a:1 g:2\n\
         /wat/test.me.2 = a:2\n\
         DONE\n"
    );
}
