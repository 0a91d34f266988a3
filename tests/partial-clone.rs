//! Cloning a fresh cave over a subtree and populating it piece by piece.

mod common;
use common::*;

#[test]
fn cloned_cave_fetches_exactly_what_it_asks_for() {
    let fleet = Fleet::new();
    write_files(
        &fleet.cave_dir("repo-full"),
        &[
            ("test.me.1", "gsadfs"),
            ("test.me.4", "fwadeaewdsa"),
            ("wat/test.me.2", "gsadf3dq"),
            ("wat/test.me.3", "afaswewfas"),
            ("wat/inner/another.file", "asdafaqw"),
        ],
    );
    fleet.init_cave("repo-full");
    fleet.hoard(&["init"]);
    fleet.add_remote("repo-full", "/", &["--fetch-new"]);
    let res = fleet.hoard(&["contents", "pull", "repo-full-name"]);
    assert_eq!(
        res,
        "+/test.me.1\n\
         +/test.me.4\n\
         +/wat/inner/another.file\n\
         +/wat/test.me.2\n\
         +/wat/test.me.3\n\
         Sync'ed repo-full-name to hoard!\nDONE\n"
    );

    let clone_dir = fleet.cave_dir("repo-cloned-wat");
    fleet.hoard(&[
        "clone",
        clone_dir.to_str().unwrap(),
        "repo-cloned-wat",
        "/wat",
        "--fetch-new",
    ]);

    let res = fleet.hoard(&["contents", "get", "repo-cloned-wat", "inner"]);
    assert_eq!(res, "+/wat/inner/another.file\nDONE\n");

    let res = fleet.hoard(&["contents", "ls", "--show-remotes"]);
    assert_eq!(
        res,
        "/ => (repo-full-name:.)\n\
         /test.me.1 = a:1\n\
         /test.me.4 = a:1\n\
         /wat => (repo-cloned-wat:.), (repo-full-name:wat)\n\
         /wat/inner => (repo-cloned-wat:inner), (repo-full-name:wat/inner)\n\
         /wat/inner/another.file = a:1 g:1\n\
         /wat/test.me.2 = a:1\n\
         /wat/test.me.3 = a:1\n\
         DONE\n"
    );

    // No files yet; the push materializes exactly the requested subtree.
    assert_eq!(file_list(&clone_dir), Vec::<String>::new());
    let res = fleet.hoard(&["files", "push", "repo-cloned-wat"]);
    assert_eq!(
        res.lines().collect::<Vec<_>>(),
        vec![
            "repo-cloned-wat:",
            "+ inner/another.file",
            "repo-cloned-wat:",
            "DONE",
        ]
    );
    assert_eq!(file_list(&clone_dir), vec!["inner/another.file"]);

    // Asking for the rest of the mount brings in the remaining files.
    let res = fleet.hoard(&["contents", "get", "repo-cloned-wat"]);
    assert_eq!(res, "+/wat/test.me.2\n+/wat/test.me.3\nDONE\n");
    let res = fleet.hoard(&["files", "push", "repo-cloned-wat"]);
    assert_eq!(
        res.lines().collect::<Vec<_>>(),
        vec![
            "repo-cloned-wat:",
            "+ test.me.2",
            "+ test.me.3",
            "repo-cloned-wat:",
            "DONE",
        ]
    );
    assert_eq!(
        file_list(&clone_dir),
        vec!["inner/another.file", "test.me.2", "test.me.3"]
    );
}
