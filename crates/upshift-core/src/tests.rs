use std::path::{Path, PathBuf};

use super::*;

fn installed() -> ServerVersion {
    ServerVersion::new(5, 34, 0)
}

#[test]
fn parse_plain_server_version() {
    let version = ServerVersion::parse(" 5.24.0 ").expect("version should parse");
    assert_eq!(version.major(), 5);
    assert_eq!(version.minor(), 24);
    assert_eq!(version.update(), 0);
    assert_eq!(version.to_string(), "5.24.0");
}

#[test]
fn malformed_major_version_is_rejected() {
    let err = prevent_version_downgrade(&installed(), "a.24.0").expect_err("must reject");
    assert_eq!(err, VersionCheckError::Malformed("a.24.0".to_string()));
    assert!(err.to_string().contains("Invalid selected version"));
}

#[test]
fn malformed_minor_version_is_rejected() {
    let err = prevent_version_downgrade(&installed(), "5.b.0").expect_err("must reject");
    assert!(matches!(err, VersionCheckError::Malformed(_)));
}

#[test]
fn qualified_update_version_is_malformed() {
    let err =
        prevent_version_downgrade(&installed(), "5.24.0-SNAPSHOT").expect_err("must reject");
    assert!(matches!(err, VersionCheckError::Malformed(_)));
}

#[test]
fn wrong_component_count_is_malformed() {
    for raw in ["5.24", "5.24.0.1", "5..0", "-5.24.0"] {
        let err = ServerVersion::parse(raw).expect_err("must reject");
        assert!(
            matches!(err, VersionCheckError::Malformed(_)),
            "unexpected error for {raw}: {err}"
        );
    }
}

#[test]
fn empty_selected_version_is_rejected() {
    let err = prevent_version_downgrade(&installed(), "  ").expect_err("must reject");
    assert_eq!(err, VersionCheckError::Empty);
    assert!(err.to_string().contains("Empty selected version"));
}

#[test]
fn same_version_is_rejected() {
    let err = prevent_version_downgrade(&installed(), "5.34.0").expect_err("must reject");
    assert!(matches!(err, VersionCheckError::SameVersion(_)));
    assert!(err.to_string().contains("It was selected the same version"));
}

#[test]
fn downgrade_is_rejected() {
    let err = prevent_version_downgrade(&installed(), "5.24.0").expect_err("must reject");
    assert!(matches!(err, VersionCheckError::Downgrade { .. }));
    assert!(err.to_string().contains("The version indicated is incorrect"));

    let err = prevent_version_downgrade(&installed(), "4.99.99").expect_err("must reject");
    assert!(matches!(err, VersionCheckError::Downgrade { .. }));
}

#[test]
fn newer_versions_are_accepted() {
    for raw in ["5.35.0", "5.34.1", "6.0.0"] {
        let selected = prevent_version_downgrade(&installed(), raw).expect("must accept");
        assert_eq!(selected.to_string(), raw);
    }
}

#[test]
fn components_compare_numerically() {
    let selected = prevent_version_downgrade(&ServerVersion::new(5, 9, 0), "5.10.0")
        .expect("5.10.0 is newer than 5.9.0");
    assert_eq!(selected, ServerVersion::new(5, 10, 0));
}

#[test]
fn installed_version_reads_branding_properties() {
    let raw = "# branding\nproduct_name=Payara Server\nmajor_version=5\nminor_version=2022\nupdate_version=1\n";
    let version = parse_installed_version(raw).expect("must parse");
    assert_eq!(version, ServerVersion::new(5, 2022, 1));
}

#[test]
fn installed_version_requires_every_component() {
    let err = parse_installed_version("major_version=5\nminor_version=24\n")
        .expect_err("missing update must fail");
    assert!(err.to_string().contains("update_version"));
}

#[test]
fn distribution_names_round_trip() {
    for distribution in Distribution::ALL {
        assert_eq!(Distribution::parse(distribution.as_str()), Some(distribution));
    }
    assert_eq!(Distribution::parse("PAYARA-WEB"), Some(Distribution::PayaraWeb));
    assert_eq!(Distribution::parse("payara-micro"), None);
    assert!(Distribution::PayaraWebMl.is_web());
    assert!(!Distribution::PayaraMl.is_web());
}

#[test]
fn download_url_matches_repository_layout() {
    let url = Distribution::PayaraWeb.download_url(
        "https://repo.example.test/distributions/",
        &ServerVersion::new(5, 35, 0),
    );
    assert_eq!(
        url,
        "https://repo.example.test/distributions/payara-web/5.35.0/payara-web-5.35.0.zip"
    );
}

#[test]
fn builtin_move_set_keeps_declared_order() {
    let set = MoveSet::builtin();
    let names = set.iter().map(MoveEntry::as_str).collect::<Vec<_>>();
    assert_eq!(names.first(), Some(&"common"));
    assert_eq!(names.last(), Some(&"../bin"));
    assert_eq!(set.len(), 13);
    assert!(set.contains("lib"));
    assert!(set.contains("../mq"));
}

#[test]
fn move_entry_normalizes_separators() {
    let entry = MoveEntry::parse(".\\config\\branding\\").expect("must parse");
    assert_eq!(entry.as_str(), "config/branding");
    assert_eq!(entry.file_name(), "branding");
    assert_eq!(entry.to_host_string('\\'), "config\\branding");
}

#[test]
fn move_entry_rejects_escaping_and_absolute_paths() {
    assert!(MoveEntry::parse("/opt/payara").is_err());
    assert!(MoveEntry::parse("C:\\payara").is_err());
    assert!(MoveEntry::parse("lib/../../etc").is_err());
    assert!(MoveEntry::parse("..").is_err());
    assert!(MoveEntry::parse("").is_err());
}

#[test]
fn move_entry_resolves_sibling_paths_lexically() {
    let base = Path::new("/opt/payara5/glassfish");
    let entry = MoveEntry::parse("../mq").expect("must parse");
    assert_eq!(entry.resolve(base), PathBuf::from("/opt/payara5/mq"));
    assert!(entry.is_optional_bundle());
    assert_eq!(
        entry.resolve_variant(base, SuffixVariant::Backup),
        PathBuf::from("/opt/payara5/mq.old")
    );

    let nested = MoveEntry::parse("config/branding").expect("must parse");
    assert_eq!(
        nested.resolve_variant(base, SuffixVariant::Staged),
        PathBuf::from("/opt/payara5/glassfish/config/branding.new")
    );
    assert!(!nested.is_optional_bundle());
}

#[test]
fn move_set_rejects_duplicates() {
    let err = MoveSet::from_entries(["modules", "lib", "modules/"]).expect_err("must reject");
    assert!(err.to_string().contains("duplicate move entry 'modules'"));
}

#[test]
fn descriptor_round_trips_with_host_separator() {
    let set = MoveSet::from_entries(["modules", "config/branding", "../mq"]).expect("valid set");

    let windows = set.to_descriptor('\\');
    assert_eq!(
        windows,
        "PAYARA_UPGRADE_DIRS=modules,config\\\\branding,..\\\\mq\n"
    );
    assert_eq!(MoveSet::parse_descriptor(&windows).expect("must parse"), set);

    let posix = set.to_descriptor('/');
    assert_eq!(posix, "PAYARA_UPGRADE_DIRS=modules,config/branding,../mq\n");
    assert_eq!(MoveSet::parse_descriptor(&posix).expect("must parse"), set);
}

#[test]
fn descriptor_requires_upgrade_dirs_key() {
    let err = MoveSet::parse_descriptor("OTHER=modules\n").expect_err("must fail");
    assert!(err.to_string().contains(UPGRADE_DIRS_PROPERTY));
}

#[test]
fn properties_support_comments_and_escapes() {
    let parsed = parse_properties("! comment\n# other\nkey\\=name = a\\:b\nflag\n");
    assert_eq!(parsed.get("key=name").map(String::as_str), Some("a:b"));
    assert_eq!(parsed.get("flag").map(String::as_str), Some(""));
}

#[test]
fn outcome_exit_codes_and_ordering() {
    assert_eq!(CommandOutcome::Success.exit_code(), 0);
    assert_eq!(CommandOutcome::Error.exit_code(), 1);
    assert_eq!(CommandOutcome::Warning.exit_code(), 4);
    assert_eq!(
        CommandOutcome::Success.worst(CommandOutcome::Warning),
        CommandOutcome::Warning
    );
    assert_eq!(
        CommandOutcome::Error.worst(CommandOutcome::Warning),
        CommandOutcome::Error
    );
}
