//! End-to-end reconciliation against the recording mock host.

mod common;

use std::sync::Arc;

use common::{ctx, MockHost};
use reconcile::{
    CancelToken, DryHost, Engine, File, Group, Host, Item, Outcome, Registry, RunOptions, User,
};

#[test]
fn group_create_then_converge() {
    let host = MockHost::new();
    host.seed_accounts(|_| {});

    let group = Group::new("web", 101);
    assert_eq!(group.apply(&ctx(&host)).unwrap(), Outcome::Created);
    assert_eq!(host.command_log(), vec!["groupadd -g 101 web"]);

    assert_eq!(group.apply(&ctx(&host)).unwrap(), Outcome::Unchanged);
    assert_eq!(host.command_log().len(), 1, "second apply must be a no-op");
}

#[test]
fn gid_keyed_rename_rewrites_cached_users() {
    let host = MockHost::new();
    host.seed_accounts(|snap| {
        snap.insert_group(Group::new("web", 101));
        let mut bob = User::new("bob", 1001);
        bob.group = "web".to_string();
        bob.groups = vec!["web".to_string(), "docker".to_string()];
        snap.insert_user(bob);
    });

    let mut group = Group::new("web2", 101);
    group.gid_primary = true;
    assert_eq!(group.apply(&ctx(&host)).unwrap(), Outcome::Modified);
    assert_eq!(host.command_log(), vec!["groupmod -n web2 web"]);

    let snap = host.snapshot().lock().unwrap();
    let bob = snap.user("bob").unwrap();
    assert_eq!(bob.group, "web2");
    assert_eq!(bob.groups, vec!["web2", "docker"]);
    assert!(snap.group("web").is_none());
}

#[test]
fn gid_change_without_rename() {
    let host = MockHost::new();
    host.seed_accounts(|snap| {
        snap.insert_group(Group::new("web", 101));
    });

    let group = Group::new("web", 201);
    assert_eq!(group.apply(&ctx(&host)).unwrap(), Outcome::Modified);
    assert_eq!(host.command_log(), vec!["groupmod -g 201 web"]);
}

#[test]
fn group_delete_flag() {
    let host = MockHost::new();
    host.seed_accounts(|snap| {
        snap.insert_group(Group::new("web", 101));
    });

    let mut group = Group::new("web", 101);
    group.delete = true;
    assert_eq!(group.apply(&ctx(&host)).unwrap(), Outcome::Deleted);
    assert_eq!(host.command_log(), vec!["groupdel web"]);

    assert_eq!(group.apply(&ctx(&host)).unwrap(), Outcome::Unchanged);
    assert_eq!(host.command_log().len(), 1);
}

#[test]
fn user_create_issues_full_useradd() {
    let host = MockHost::new();
    host.seed_accounts(|_| {});

    let mut alice = User::new("alice", 1000);
    alice.groups = vec!["wheel".to_string(), "docker".to_string()];
    assert_eq!(alice.apply(&ctx(&host)).unwrap(), Outcome::Created);
    assert_eq!(
        host.command_log(),
        vec!["useradd -m -g alice -u 1000 -G wheel,docker alice"]
    );
}

#[test]
fn supplemental_group_order_does_not_matter() {
    let host = MockHost::new();
    host.seed_accounts(|_| {});

    let mut alice = User::new("alice", 1000);
    alice.groups = vec!["wheel".to_string(), "docker".to_string()];
    alice.apply(&ctx(&host)).unwrap();

    let mut shuffled = User::new("alice", 1000);
    shuffled.groups = vec!["docker".to_string(), "wheel".to_string()];
    assert_eq!(shuffled.apply(&ctx(&host)).unwrap(), Outcome::Unchanged);
    assert_eq!(
        host.command_log().len(),
        1,
        "reordered groups must not emit usermod -G"
    );
}

#[test]
fn password_converges_over_chpasswd_stdin() {
    let host = MockHost::new();
    host.seed_accounts(|snap| {
        let mut alice = User::new("alice", 1000);
        alice.group = "alice".to_string();
        alice.password = "!".to_string();
        snap.insert_user(alice);
    });

    let mut alice = User::new("alice", 1000);
    alice.password = "$6$salt$hash".to_string();
    assert_eq!(alice.apply(&ctx(&host)).unwrap(), Outcome::Modified);

    assert_eq!(host.command_log(), vec!["chpasswd -e"]);
    let stdins = host.stdin_log();
    assert_eq!(stdins.len(), 1);
    assert_eq!(stdins[0].1, b"alice:$6$salt$hash\n");

    assert_eq!(alice.apply(&ctx(&host)).unwrap(), Outcome::Unchanged);
    assert_eq!(host.command_log().len(), 1);
}

#[test]
fn locked_password_sentinels_compare_equal() {
    for stored in ["", "!", "!!", "x"] {
        let host = MockHost::new();
        host.seed_accounts(|snap| {
            let mut alice = User::new("alice", 1000);
            alice.group = "alice".to_string();
            alice.password = stored.to_string();
            snap.insert_user(alice);
        });

        let alice = User::new("alice", 1000);
        assert_eq!(
            alice.apply(&ctx(&host)).unwrap(),
            Outcome::Unchanged,
            "stored password {stored:?}"
        );
        assert!(host.command_log().is_empty());
    }
}

#[test]
fn uid_keyed_rename_then_password_lands_on_new_name() {
    let host = MockHost::new();
    host.seed_accounts(|snap| {
        let mut alice = User::new("alice", 1000);
        alice.group = "staff".to_string();
        snap.insert_user(alice);
    });

    let mut renamed = User::new("alicia", 1000);
    renamed.uid_primary = true;
    renamed.group = "staff".to_string();
    renamed.password = "$6$s$h".to_string();
    assert_eq!(renamed.apply(&ctx(&host)).unwrap(), Outcome::Modified);
    assert_eq!(
        host.command_log(),
        vec!["usermod -l alicia alice", "chpasswd -e"]
    );
    assert_eq!(host.stdin_log()[0].1, b"alicia:$6$s$h\n");
}

#[test]
fn user_delete_flag() {
    let host = MockHost::new();
    host.seed_accounts(|snap| {
        snap.insert_user(User::new("alice", 1000));
    });

    let mut gone = User::new("alice", 1000);
    gone.delete = true;
    assert_eq!(gone.apply(&ctx(&host)).unwrap(), Outcome::Deleted);
    assert_eq!(host.command_log(), vec!["userdel alice"]);
    assert!(host.snapshot().lock().unwrap().user("alice").is_none());

    assert_eq!(gone.apply(&ctx(&host)).unwrap(), Outcome::Unchanged);
    assert_eq!(host.command_log().len(), 1);
}

#[test]
fn file_create_writes_through_the_host() {
    let host = MockHost::new();
    let mut motd = File::new("/etc/motd");
    motd.content = Some("hello\n".to_string());

    assert_eq!(motd.apply(&ctx(&host)).unwrap(), Outcome::Created);
    assert_eq!(host.file_content("/etc/motd").unwrap(), b"hello\n");

    assert_eq!(motd.apply(&ctx(&host)).unwrap(), Outcome::Unchanged);
}

#[test]
fn file_rewrite_is_temp_write_then_rename() {
    let host = MockHost::new();
    host.seed_file("/etc/motd", 0o644, "old\n");

    let mut motd = File::new("/etc/motd");
    motd.content = Some("new\n".to_string());
    assert_eq!(motd.apply(&ctx(&host)).unwrap(), Outcome::Modified);

    assert_eq!(
        host.mutation_log(),
        vec![
            "write /etc/motd.steward-tmp",
            "chmod 644 /etc/motd.steward-tmp",
            "rename /etc/motd.steward-tmp -> /etc/motd",
        ]
    );
    assert_eq!(host.file_content("/etc/motd").unwrap(), b"new\n");
    assert!(host.file_content("/etc/motd.steward-tmp").is_none());
}

#[test]
fn file_mode_only_change_uses_chmod() {
    let host = MockHost::new();
    host.seed_file("/etc/motd", 0o644, "hello\n");

    let mut motd = File::new("/etc/motd");
    motd.content = Some("hello\n".to_string());
    motd.mode = Some(0o600);
    assert_eq!(motd.apply(&ctx(&host)).unwrap(), Outcome::Modified);
    assert_eq!(host.mutation_log(), vec!["chmod 600 /etc/motd"]);

    assert_eq!(motd.apply(&ctx(&host)).unwrap(), Outcome::Unchanged);
}

#[test]
fn file_owner_resolves_through_earlier_user_item() {
    let host = MockHost::new();
    host.seed_accounts(|_| {});
    host.seed_file("/srv/app.conf", 0o644, "x\n");

    let mut registry = Registry::new();
    registry.add(Box::new(User::new("svc", 990))).unwrap();
    let mut conf = File::new("/srv/app.conf");
    conf.owner = Some("svc".to_string());
    registry.add(Box::new(conf)).unwrap();

    let engine = Engine::new(RunOptions::default(), CancelToken::new());
    let summary = engine.apply(&registry, &host, None).unwrap();
    assert_eq!(summary.created, 1);
    assert_eq!(summary.modified, 1);
    assert_eq!(host.file_stat("/srv/app.conf").unwrap().uid, 990);
}

#[test]
fn file_delete_flag() {
    let host = MockHost::new();
    host.seed_file("/etc/stale", 0o644, "bye\n");

    let mut stale = File::new("/etc/stale");
    stale.delete = true;
    assert_eq!(stale.apply(&ctx(&host)).unwrap(), Outcome::Deleted);
    assert_eq!(host.mutation_log(), vec!["remove /etc/stale"]);

    assert_eq!(stale.apply(&ctx(&host)).unwrap(), Outcome::Unchanged);
    assert_eq!(host.mutation_log().len(), 1);
}

#[test]
fn dry_run_records_nothing_on_the_cascade() {
    let mock = Arc::new(MockHost::new());
    let dry = DryHost::new(0, 0, Some(mock.clone() as Arc<dyn Host>), CancelToken::new());

    let mut motd = File::new("/etc/motd");
    motd.content = Some("hello\n".to_string());
    assert_eq!(motd.apply(&ctx(&dry)).unwrap(), Outcome::Created);

    assert!(mock.mutation_log().is_empty(), "cascade saw a write");
    assert!(mock.command_log().is_empty(), "cascade ran a command");
    assert_eq!(
        dry.read_file(std::path::Path::new("/etc/motd")).unwrap(),
        b"hello\n"
    );
}

#[test]
fn dry_account_mutations_stay_in_the_shadow() {
    let mock = Arc::new(MockHost::new());
    mock.seed_accounts(|_| {});
    let dry = DryHost::new(0, 0, Some(mock.clone() as Arc<dyn Host>), CancelToken::new());

    let group = Group::new("web", 101);
    assert_eq!(group.apply(&ctx(&dry)).unwrap(), Outcome::Created);
    assert_eq!(group.apply(&ctx(&dry)).unwrap(), Outcome::Unchanged);

    assert!(mock.command_log().is_empty());
    assert!(mock.snapshot().lock().unwrap().group("web").is_none());
    assert!(dry.snapshot().lock().unwrap().group("web").is_some());
}

#[test]
fn dry_reads_cascade_through_a_dry_cascade() {
    let mock = Arc::new(MockHost::new());
    mock.seed_file("/etc/motd", 0o644, "cascaded\n");
    let inner = Arc::new(DryHost::new(
        0,
        0,
        Some(mock as Arc<dyn Host>),
        CancelToken::new(),
    ));
    let outer = DryHost::new(0, 0, Some(inner as Arc<dyn Host>), CancelToken::new());

    assert_eq!(
        outer.read_file(std::path::Path::new("/etc/motd")).unwrap(),
        b"cascaded\n"
    );
}

#[test]
fn dry_remove_masks_the_cascade() {
    let mock = Arc::new(MockHost::new());
    mock.seed_file("/etc/stale", 0o644, "bye\n");
    let dry = DryHost::new(0, 0, Some(mock.clone() as Arc<dyn Host>), CancelToken::new());

    let mut stale = File::new("/etc/stale");
    stale.delete = true;
    assert_eq!(stale.apply(&ctx(&dry)).unwrap(), Outcome::Deleted);
    assert_eq!(stale.apply(&ctx(&dry)).unwrap(), Outcome::Unchanged);

    assert!(mock.mutation_log().is_empty());
    assert!(mock.file_content("/etc/stale").is_some(), "cascade untouched");
}

#[test]
fn dry_tally_counts_only_whats_already_in_place() {
    let mock = Arc::new(MockHost::new());
    mock.seed_file("/etc/passwd", 0o644, "");
    mock.seed_file("/etc/group", 0o644, "web:x:101:\n");
    let dry = DryHost::new(0, 0, Some(mock.clone() as Arc<dyn Host>), CancelToken::new());

    let mut registry = Registry::new();
    registry.add(Box::new(Group::new("web", 101))).unwrap();
    registry.add(Box::new(Group::new("db", 102))).unwrap();

    let engine = Engine::new(
        RunOptions {
            dry: true,
            ..Default::default()
        },
        CancelToken::new(),
    );
    let summary = engine.apply(&registry, &dry, None).unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.unchanged, 1);
    assert_eq!(summary.created, 1);
    assert_eq!(summary.finished, 1, "dry tally counts unchanged only");
    assert!(mock.command_log().is_empty());
}

#[test]
fn failing_item_aborts_the_run_with_its_source() {
    let host = MockHost::new();

    let mut registry = Registry::new();
    let mut conf = File::new("/srv/app.conf");
    conf.content = Some("x\n".to_string());
    conf.owner = Some("bob".to_string());
    registry
        .add_from_source("site.yaml:1", Box::new(conf))
        .unwrap();
    registry
        .add_from_source("site.yaml:4", Box::new(User::new("bob", 1001)))
        .unwrap();

    let engine = Engine::new(RunOptions::default(), CancelToken::new());
    let err = engine.apply(&registry, &host, None).unwrap_err();

    assert!(err.to_string().starts_with("site.yaml:1 "));
    assert!(err.to_string().contains("unknown user"));
    assert!(host.command_log().is_empty(), "later items must not run");
    assert!(host.mutation_log().is_empty());
}

#[test]
fn same_registry_same_state_same_host_calls() {
    let build = || {
        let mut registry = Registry::new();
        registry.add(Box::new(Group::new("web", 101))).unwrap();
        let mut alice = User::new("alice", 1000);
        alice.groups = vec!["web".to_string()];
        registry.add(Box::new(alice)).unwrap();
        registry
    };

    let run = |registry: &Registry| {
        let host = MockHost::new();
        host.seed_accounts(|_| {});
        let engine = Engine::new(RunOptions::default(), CancelToken::new());
        engine.apply(registry, &host, None).unwrap();
        host.command_log()
    };

    let registry = build();
    assert_eq!(run(&registry), run(&build()));
}

#[test]
fn cancelled_run_surfaces_as_cancellation() {
    let host = MockHost::new();
    let mut registry = Registry::new();
    registry.add(Box::new(Group::new("web", 101))).unwrap();

    let cancel = CancelToken::new();
    cancel.cancel();
    let engine = Engine::new(RunOptions::default(), cancel);
    let err = engine.apply(&registry, &host, None).unwrap_err();
    assert!(err.is_cancelled());
    assert!(host.command_log().is_empty());
}
