//! End-to-end tests over the public FileSystem surface
//!
//! These follow the user-visible scenarios: plain file manipulation,
//! copy-on-write isolation between versions, storage release on removal,
//! rename collisions, search, and tree rendering.

use branchfs::{FileSystem, NodeKind, SaverOptions, VfsError};
use tempfile::TempDir;

fn open_fs(dir: &TempDir) -> FileSystem {
    FileSystem::open(SaverOptions::in_dir(dir.path())).unwrap()
}

#[test]
fn fresh_fs_create_write_read_list() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    fs.make_file("a").unwrap();
    fs.update_content("a", "hello").unwrap();
    assert_eq!(fs.get_content("a").unwrap(), "hello");
    assert_eq!(fs.ls().unwrap(), vec!["a"]);
}

#[test]
fn cow_across_versions() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    let v1 = fs.current_version();
    fs.make_file("f").unwrap();
    let v2 = fs.branch("experiment").unwrap();
    assert_ne!(v1, v2);

    fs.update_content("f", "x").unwrap();

    fs.switch_version(v1).unwrap();
    assert_eq!(fs.get_content("f").unwrap(), "");
    fs.switch_version(v2).unwrap();
    assert_eq!(fs.get_content("f").unwrap(), "x");
}

#[test]
fn cow_keeps_tree_text_stable_in_the_model_version() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    let v1 = fs.current_version();
    fs.mkdir("src").unwrap();
    fs.chdir("src").unwrap();
    fs.make_file("lib.rs").unwrap();
    fs.to_parent().unwrap();

    let before = fs.tree_text().unwrap();
    let v2 = fs.branch("").unwrap();

    // Mutate the fork heavily.
    fs.chdir("src").unwrap();
    fs.make_file("main.rs").unwrap();
    fs.rename("lib.rs", "renamed.rs").unwrap();
    fs.to_parent().unwrap();
    fs.mkdir("docs").unwrap();

    fs.switch_version(v1).unwrap();
    assert_eq!(fs.tree_text().unwrap(), before);
    assert_eq!(fs.find("main").unwrap().len(), 0);

    fs.switch_version(v2).unwrap();
    assert_eq!(fs.find("main").unwrap().len(), 1);
    assert_eq!(fs.find("renamed").unwrap().len(), 1);
}

#[test]
fn directory_removal_frees_storage() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    fs.mkdir("d").unwrap();
    fs.chdir("d").unwrap();
    fs.make_file("x").unwrap();
    fs.update_content("x", "bytes").unwrap();
    fs.to_parent().unwrap();

    fs.rmdir("d").unwrap();
    assert!(fs.ls().unwrap().is_empty());
    assert!(matches!(fs.chdir("d"), Err(VfsError::NotFound(_))));
    assert!(fs.find("x").unwrap().is_empty());
}

#[test]
fn shared_subtree_survives_removal_in_one_version() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    let v1 = fs.current_version();
    fs.mkdir("shared").unwrap();
    fs.chdir("shared").unwrap();
    fs.make_file("keep").unwrap();
    fs.update_content("keep", "contents").unwrap();
    fs.to_parent().unwrap();

    let v2 = fs.branch("").unwrap();
    fs.rmdir("shared").unwrap();
    assert!(fs.ls().unwrap().is_empty());

    // The model version still holds the whole subtree.
    fs.switch_version(v1).unwrap();
    assert_eq!(fs.ls().unwrap(), vec!["shared"]);
    fs.chdir("shared").unwrap();
    assert_eq!(fs.get_content("keep").unwrap(), "contents");

    fs.switch_version(v2).unwrap();
    assert!(fs.ls().unwrap().is_empty());
}

#[test]
fn rename_collision_is_rejected_and_harmless() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    fs.make_file("a").unwrap();
    fs.make_file("b").unwrap();
    fs.update_content("a", "A").unwrap();
    fs.update_content("b", "B").unwrap();

    assert!(matches!(
        fs.rename("a", "b"),
        Err(VfsError::AlreadyExists(_))
    ));
    let mut names = fs.ls().unwrap();
    names.sort();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(fs.get_content("a").unwrap(), "A");
    assert_eq!(fs.get_content("b").unwrap(), "B");
}

#[test]
fn wrong_kind_operations_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    fs.make_file("f").unwrap();
    fs.mkdir("d").unwrap();

    assert!(matches!(fs.chdir("f"), Err(VfsError::WrongKind { .. })));
    assert!(matches!(fs.rm("d"), Err(VfsError::WrongKind { .. })));
    assert!(matches!(fs.rmdir("f"), Err(VfsError::WrongKind { .. })));
    assert!(matches!(
        fs.update_content("d", "x"),
        Err(VfsError::WrongKind { .. })
    ));
    assert!(matches!(fs.get_content("d"), Err(VfsError::WrongKind { .. })));

    assert_eq!(fs.get_kind("f").unwrap(), NodeKind::File);
    assert_eq!(fs.get_kind("d").unwrap(), NodeKind::Dir);
}

#[test]
fn names_with_spaces_round_trip() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    fs.make_file("yearly report.txt").unwrap();
    fs.update_content("yearly report.txt", "q1 q2 q3 q4").unwrap();
    assert_eq!(fs.get_content("yearly report.txt").unwrap(), "q1 q2 q3 q4");

    let hits = fs.find("report").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1, vec!["root", "yearly report.txt"]);
}

#[test]
fn deep_nesting_and_path_reporting() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    for depth in 0..12 {
        let name = format!("level{}", depth);
        fs.mkdir(&name).unwrap();
        fs.chdir(&name).unwrap();
    }
    fs.make_file("leaf").unwrap();
    let pwd = fs.pwd().unwrap();
    assert!(pwd.starts_with("/level0/level1"));
    assert!(pwd.ends_with("level11"));

    let hits = fs.find("leaf").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].1.len(), 14); // root + 12 levels + leaf

    for _ in 0..12 {
        fs.to_parent().unwrap();
    }
    assert_eq!(fs.pwd().unwrap(), "/");
    assert_eq!(fs.ls().unwrap(), vec!["level0"]);
}

#[test]
fn version_listing_carries_info_text() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    fs.branch("second go").unwrap();
    fs.branch("third go").unwrap();

    let versions = fs.versions();
    assert_eq!(versions.len(), 3);
    assert_eq!(versions[0].info, "");
    assert_eq!(versions[1].info, "second go");
    assert_eq!(versions[2].info, "third go");
    assert!(versions.windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn chained_forks_share_transitively() {
    let dir = TempDir::new().unwrap();
    let mut fs = open_fs(&dir);

    let v1 = fs.current_version();
    fs.make_file("base").unwrap();
    fs.update_content("base", "v1").unwrap();

    let v2 = fs.branch("").unwrap();
    fs.update_content("base", "v2").unwrap();

    let v3 = fs.branch("").unwrap();
    fs.update_content("base", "v3").unwrap();
    fs.make_file("extra").unwrap();

    for (version, expected) in [(v1, "v1"), (v2, "v2"), (v3, "v3")] {
        fs.switch_version(version).unwrap();
        assert_eq!(fs.get_content("base").unwrap(), expected);
    }
    fs.switch_version(v2).unwrap();
    assert!(matches!(fs.get_content("extra"), Err(VfsError::NotFound(_))));
}
