//! The full four-role fleet: partial, full, backup, and incoming caves
//! all mounted at the hoard root.

mod common;
use common::*;

#[test]
fn remotes_lists_caves_and_mounts() {
    let fleet = Fleet::new();
    populate_repotypes(&fleet);
    init_complex_hoard(&fleet);

    let res = fleet.hoard(&["remotes"]);
    let lines: Vec<&str> = res.lines().collect();
    assert_eq!(lines[0], "4 total remotes.");
    for (line, (name, role)) in lines[1..5].iter().zip([
        ("repo-partial-name", "partial"),
        ("repo-full-name", "full"),
        ("repo-backup-name", "backup"),
        ("repo-incoming-name", "incoming"),
    ]) {
        assert!(
            line.starts_with(&format!("  [{name}] ")) && line.ends_with(&format!("({role})")),
            "unexpected remotes line: {line}"
        );
    }
    assert_eq!(lines[5], "Mounts:");
    assert_eq!(
        lines[6],
        "  / -> repo-partial-name, repo-full-name, repo-backup-name, repo-incoming-name"
    );
    assert_eq!(lines[7], "DONE");
}

#[test]
fn pull_all_reconciles_every_role() {
    let fleet = Fleet::new();
    populate_repotypes(&fleet);
    init_complex_hoard(&fleet);

    let res = fleet.hoard(&["contents", "pull", "--all"]);
    assert_eq!(
        res.lines().collect::<Vec<_>>(),
        vec![
            "+/test.me.1",
            "+/wat/test.me.2",
            "Sync'ed repo-partial-name to hoard!",
            "=/test.me.1",
            "+/test.me.4",
            "=/wat/test.me.2",
            "+/wat/test.me.3",
            "Sync'ed repo-full-name to hoard!",
            "=/test.me.1",
            "=/wat/test.me.3",
            "Sync'ed repo-backup-name to hoard!",
            "-/test.me.4",
            "<+/test.me.5",
            "u/wat/test.me.3",
            "<+/wat/test.me.6",
            "Sync'ed repo-incoming-name to hoard!",
            "DONE",
        ]
    );

    let res = fleet.hoard(&["contents", "status", "--hide-time"]);
    assert_eq!(
        res,
        "|Num Files                |total     |available |get       |copy      |cleanup   |\n\
         |repo-backup-name         |         6|         1|         5|          |          |\n\
         |repo-full-name           |         6|         3|         3|          |          |\n\
         |repo-incoming-name       |         4|          |          |          |         4|\n\
         |repo-partial-name        |         2|         2|          |          |          |\n\
         \n\
         |Size                     |total     |available |get       |copy      |cleanup   |\n\
         |repo-backup-name         |        46|         6|        40|          |          |\n\
         |repo-full-name           |        46|        25|        21|          |          |\n\
         |repo-incoming-name       |        32|          |          |          |        32|\n\
         |repo-partial-name        |        14|        14|          |          |          |\n"
    );

    let res = fleet.hoard(&["contents", "ls", "--skip-folders"]);
    assert_eq!(
        res,
        "/test.me.1 = a:3\n\
         /test.me.4 = a:1 g:1 c:1\n\
         /test.me.5 = g:2 c:1\n\
         /wat/test.me.2 = a:2 g:1\n\
         /wat/test.me.3 = g:2 c:1\n\
         /wat/test.me.6 = g:2 c:1\n\
         DONE\n"
    );

    let res = fleet.hoard(&["contents", "ls", "--show-remotes"]);
    assert_eq!(
        res,
        "/ => (repo-backup-name:.), (repo-full-name:.), (repo-incoming-name:.), (repo-partial-name:.)\n\
         /test.me.1 = a:3\n\
         /test.me.4 = a:1 g:1 c:1\n\
         /test.me.5 = g:2 c:1\n\
         /wat => (repo-backup-name:wat), (repo-full-name:wat), (repo-incoming-name:wat), (repo-partial-name:wat)\n\
         /wat/test.me.2 = a:2 g:1\n\
         /wat/test.me.3 = g:2 c:1\n\
         /wat/test.me.6 = g:2 c:1\n\
         DONE\n"
    );
}

#[test]
fn pending_and_health_report_the_work_left() {
    let fleet = Fleet::new();
    populate_repotypes(&fleet);
    init_complex_hoard(&fleet);
    fleet.hoard(&["contents", "pull", "--all"]);

    let res = fleet.hoard(&["files", "pending"]);
    assert_eq!(
        res,
        "repo-partial-name:\n\
         repo-full-name:\n\
         TO_GET (from 1) /test.me.5\n\
         TO_GET (from 1) /wat/test.me.3\n\
         TO_GET (from 1) /wat/test.me.6\n\
         \x20repo-incoming-name has 3 files\n\
         repo-backup-name:\n\
         TO_GET (from 2) /test.me.4\n\
         TO_GET (from 2) /wat/test.me.2\n\
         TO_GET (from 1) /test.me.5\n\
         TO_GET (from 1) /wat/test.me.3\n\
         TO_GET (from 1) /wat/test.me.6\n\
         \x20repo-full-name has 2 files\n\
         \x20repo-incoming-name has 4 files\n\
         \x20repo-partial-name has 1 files\n\
         repo-incoming-name:\n\
         TO_CLEANUP /test.me.4\n\
         TO_CLEANUP /test.me.5\n\
         TO_CLEANUP /wat/test.me.3\n\
         TO_CLEANUP /wat/test.me.6\n\
         DONE\n"
    );

    let res = fleet.hoard(&["backups", "health"]);
    assert_eq!(
        res,
        "# backups: 1\n\
         scheduled count:\n\
         \x201: 6 files (46)\n\
         available count:\n\
         \x200: 5 files (40)\n\
         \x201: 1 files (6)\n\
         get_or_copy count:\n\
         \x200: 1 files (6)\n\
         \x201: 5 files (40)\n\
         cleanup count:\n\
         \x200: 6 files (46)\n\
         DONE\n"
    );
}

#[test]
fn sync_contents_places_and_sweeps_everything() {
    let fleet = Fleet::new();
    populate_repotypes(&fleet);
    init_complex_hoard(&fleet);
    fleet.hoard(&["contents", "pull", "--all"]);

    let res = fleet.hoard(&["files", "sync_contents"]);
    assert_eq!(
        res.lines().collect::<Vec<_>>(),
        vec![
            "repo-partial-name:",
            "repo-full-name:",
            "+ test.me.5",
            "+ wat/test.me.3",
            "+ wat/test.me.6",
            "repo-backup-name:",
            "+ test.me.4",
            "+ test.me.5",
            "+ wat/test.me.2",
            "+ wat/test.me.3",
            "+ wat/test.me.6",
            "repo-incoming-name:",
            "repo-partial-name:",
            "repo-full-name:",
            "repo-backup-name:",
            "repo-incoming-name:",
            "d test.me.4",
            "d test.me.5",
            "d wat/test.me.3",
            "d wat/test.me.6",
            "DONE",
        ]
    );

    assert_eq!(
        file_list(&fleet.cave_dir("repo-partial")),
        vec!["test.me.1", "wat/test.me.2"]
    );
    assert_eq!(
        file_list(&fleet.cave_dir("repo-full")),
        vec![
            "test.me.1",
            "test.me.4",
            "test.me.5",
            "wat/test.me.2",
            "wat/test.me.3",
            "wat/test.me.6",
        ]
    );
    assert_eq!(
        file_list(&fleet.cave_dir("repo-backup")),
        vec![
            "test.me.1",
            "test.me.4",
            "test.me.5",
            "wat/test.me.2",
            "wat/test.me.3",
            "wat/test.me.6",
        ]
    );
    assert_eq!(file_list(&fleet.cave_dir("repo-incoming")), Vec::<String>::new());

    let res = fleet.hoard(&["contents", "ls", "--skip-folders"]);
    assert_eq!(
        res,
        "/test.me.1 = a:3\n\
         /test.me.4 = a:2\n\
         /test.me.5 = a:2\n\
         /wat/test.me.2 = a:3\n\
         /wat/test.me.3 = a:2\n\
         /wat/test.me.6 = a:2\n\
         DONE\n"
    );
}

#[test]
fn gc_keeps_everything_reachable() {
    let fleet = Fleet::new();
    populate_repotypes(&fleet);
    init_complex_hoard(&fleet);
    fleet.hoard(&["contents", "pull", "--all"]);
    fleet.hoard(&["files", "push"]);

    let before = fleet.hoard(&["contents", "ls", "--skip-folders"]);
    let res = fleet.hoard(&["gc"]);
    assert!(res.starts_with("swept "), "unexpected gc output: {res}");
    assert!(res.ends_with("DONE\n"));

    // Everything anyone holds is still reachable and intact.
    assert_eq!(fleet.hoard(&["contents", "ls", "--skip-folders"]), before);
    assert_eq!(
        fleet.hoard(&["contents", "pull", "repo-partial-name"]),
        "Skipping update as past epoch 1 is not after hoard epoch 1\nDONE\n"
    );
}
