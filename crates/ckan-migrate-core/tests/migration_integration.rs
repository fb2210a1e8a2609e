//! Integration tests for the migration engine against a SQLite target.

use ckan_migrate_core::ckan::{self, catalog};
use ckan_migrate_core::resolver::seed_digest;
use ckan_migrate_core::{
    CsvSnapshot, EntityImporter, MemorySource, MigrationConfig, MigrationDriver, Row, RunContext,
    RunStatus, SkipReason, SqliteSink, ValiditySet, Value,
};
use pretty_assertions::assert_eq;
use std::fs;

struct TestContext {
    sink: SqliteSink,
    snapshot_dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        let sink = SqliteSink::open_in_memory().unwrap();
        sink.init_schema().unwrap();
        Self {
            sink,
            snapshot_dir: tempfile::tempdir().unwrap(),
        }
    }

    fn write_csv(&self, table: &str, content: &str) {
        fs::write(self.snapshot_dir.path().join(format!("{}.csv", table)), content).unwrap();
    }

    fn snapshot(&self) -> CsvSnapshot {
        CsvSnapshot::new(self.snapshot_dir.path())
    }

    fn text(&self, sql: &str) -> Option<String> {
        self.sink
            .connection()
            .query_row(sql, [], |row| row.get(0))
            .unwrap()
    }

    fn count(&self, table: &str) -> u64 {
        self.sink.count(table).unwrap()
    }
}

fn user(id: &str, name: &str, email: &str) -> Row {
    Row::new()
        .with("id", id)
        .with("name", name)
        .with("email", email)
        .with("state", "active")
}

fn scenario_a_users() -> Vec<Row> {
    vec![user("u1", "alice", "a@x.com"), user("u2", "bob", "a@x.com")]
}

#[test]
fn test_duplicate_emails_are_renamed() {
    let mut ctx = TestContext::new();
    let catalog = catalog();
    let users = ckan::entity(&catalog, "users").unwrap();

    let report = EntityImporter::new(users)
        .import(&scenario_a_users(), &mut ctx.sink, &RunContext::new())
        .unwrap();

    assert_eq!(ctx.count("user"), 2);
    assert_eq!(report.migrated_rows, 2);
    assert!(report.is_balanced());

    let renamed = ctx
        .text(r#"SELECT email FROM "user" WHERE id = 'u2'"#)
        .unwrap();
    assert_ne!(renamed, "a@x.com");
    assert_eq!(renamed, format!("a-migrated-{}@x.com", seed_digest("u2")));

    let ids = report.valid_ids.unwrap();
    assert!(ids.contains("u1"));
    assert!(ids.contains("u2"));
}

#[test]
fn test_rerun_updates_without_duplicates() {
    let mut ctx = TestContext::new();
    let catalog = catalog();
    let users = ckan::entity(&catalog, "users").unwrap();
    let importer = EntityImporter::new(users);

    let first = importer
        .import(&scenario_a_users(), &mut ctx.sink, &RunContext::new())
        .unwrap();
    let email_after_first = ctx.text(r#"SELECT email FROM "user" WHERE id = 'u2'"#);

    let second = importer
        .import(&scenario_a_users(), &mut ctx.sink, &RunContext::new())
        .unwrap();

    assert_eq!(first.inserted_rows, 2);
    assert_eq!(second.migrated_rows, 2);
    assert_eq!(second.updated_rows, 2);
    assert_eq!(second.inserted_rows, 0);
    assert_eq!(ctx.count("user"), 2);
    assert_eq!(
        ctx.text(r#"SELECT email FROM "user" WHERE id = 'u2'"#),
        email_after_first
    );
    let distinct: i64 = ctx
        .sink
        .connection()
        .query_row(r#"SELECT COUNT(DISTINCT email) FROM "user""#, [], |row| row.get(0))
        .unwrap();
    assert_eq!(distinct, 2);
}

#[test]
fn test_package_with_unknown_creator_is_rejected() {
    let mut ctx = TestContext::new();
    let catalog = catalog();
    let packages = ckan::entity(&catalog, "packages").unwrap();
    let context = RunContext::new().with("users", ValiditySet::from_iter(["u1", "u2"]));
    let rows = vec![Row::new()
        .with("id", "p1")
        .with("name", "water")
        .with("creator_user_id", "u9")];

    let report = EntityImporter::new(packages)
        .import(&rows, &mut ctx.sink, &context)
        .unwrap();

    assert_eq!(report.skipped_rows, 1);
    assert_eq!(report.skipped_for(SkipReason::MissingParent), 1);
    assert!(report.errors[0].contains("u9"));
    assert!(!report.valid_ids.unwrap().contains("p1"));
    assert_eq!(ctx.count("package"), 0);
}

#[test]
fn test_rejected_write_keeps_other_rows() {
    let mut ctx = TestContext::new();
    let catalog = catalog();
    let vocabularies = ckan::entity(&catalog, "vocabularies").unwrap();
    let rows = vec![
        Row::new().with("id", "v1").with("name", "genre"),
        Row::new().with("id", "v2").with("name", Value::Null),
        Row::new().with("id", "v3").with("name", "country"),
    ];

    let report = EntityImporter::new(vocabularies)
        .import(&rows, &mut ctx.sink, &RunContext::new())
        .unwrap();

    assert!(report.is_balanced());
    assert_eq!(report.migrated_rows, 2);
    assert_eq!(report.skipped_for(SkipReason::WriteFailed), 1);
    assert!(report.errors[0].starts_with("vocabularies v2: "));
    assert_eq!(ctx.count("vocabulary"), 2);
}

#[test]
fn test_tag_names_unique_per_vocabulary() {
    let mut ctx = TestContext::new();
    let catalog = catalog();
    let tags = ckan::entity(&catalog, "tags").unwrap();
    let rows = vec![
        Row::new().with("id", "t1").with("name", "economy").with("vocabulary_id", "v1"),
        Row::new().with("id", "t2").with("name", "economy").with("vocabulary_id", "v2"),
        Row::new().with("id", "t3").with("name", "economy").with("vocabulary_id", "v1"),
    ];

    let report = EntityImporter::new(tags)
        .import(&rows, &mut ctx.sink, &RunContext::new())
        .unwrap();

    assert_eq!(report.migrated_rows, 3);
    assert_eq!(report.renamed_rows, 1);
    assert_eq!(
        ctx.text("SELECT name FROM tag WHERE id = 't2'"),
        Some("economy".to_string())
    );
    assert_eq!(
        ctx.text("SELECT name FROM tag WHERE id = 't3'"),
        Some(format!("economy-migrated-{}", seed_digest("t3")))
    );
}

const CKAN_IMPORT_ORDER: [&str; 22] = [
    "users",
    "groups",
    "vocabularies",
    "tags",
    "packages",
    "resources",
    "package_extras",
    "package_tags",
    "members",
    "group_extras",
    "resource_views",
    "activities",
    "activity_details",
    "dashboards",
    "system_info",
    "task_status",
    "user_following_groups",
    "user_following_datasets",
    "package_relationships",
    "ratings",
    "term_translations",
    "tracking_raw",
];

#[test]
fn test_catalog_plans_ckan_import_order() {
    let order = MigrationDriver::new(catalog()).plan_names().unwrap();
    assert_eq!(order, CKAN_IMPORT_ORDER);
}

fn write_legacy_snapshot(ctx: &TestContext) {
    ctx.write_csv(
        "user",
        "id,name,email,about,created,fullname,sysadmin,state,password,apikey\n\
         u1,alice,a@x.com,,2017-01-01 10:00:00,Alice,True,active,hash1,key1\n\
         u2,bob,a@x.com,,2017-01-02 10:00:00,Bob,False,active,hash2,key2\n\
         u3,carol,c@x.com,,2017-01-03 10:00:00,Carol,False,deleted,hash3,key3\n",
    );
    ctx.write_csv(
        "group",
        "id,name,title,description,created,state,type,approval_status,image_url,is_organization,revision_id\n\
         g1,climate,Climate,,2017-01-01,active,organization,approved,,True,rev1\n\
         g2,climate,Climate copy,,2017-01-02,,,,,False,rev2\n",
    );
    ctx.write_csv(
        "package",
        "id,name,title,state,type,owner_org,private,creator_user_id,metadata_created,metadata_modified,revision_id\n\
         p1,water,Water,active,dataset,g1,False,u1,2017-02-01,2017-02-02,rev\n\
         p2,air,Air,active,dataset,g1,False,u9,2017-02-01,2017-02-02,rev\n\
         p3,soil,Soil,deleted,dataset,,False,u3,2017-02-01,2017-02-02,rev\n",
    );
    ctx.write_csv(
        "resource",
        "id,url,package_id,created,position,webstore_url,revision_id\n\
         r1,http://a/1.csv,p1,2017-02-03 10:00:00,0,,rev\n\
         r2,http://a/2.csv,p2,2017-02-03 11:00:00,0,,rev\n",
    );
    ctx.write_csv(
        "member",
        "id,table_id,group_id,state,table_name,capacity\n\
         m1,u1,g1,active,user,admin\n\
         m2,u9,g1,active,user,member\n\
         m3,p1,g1,active,package,public\n\
         m4,zz,g1,active,package,public\n",
    );
}

#[test]
fn test_full_run_from_snapshot() {
    let mut ctx = TestContext::new();
    write_legacy_snapshot(&ctx);
    let mut source = ctx.snapshot();

    let summary = MigrationDriver::new(catalog())
        .run(&mut source, &mut ctx.sink)
        .unwrap();

    assert_eq!(summary.status, RunStatus::Complete);
    assert_eq!(summary.order, CKAN_IMPORT_ORDER);
    assert!(summary.reports.values().all(|r| r.is_balanced()));

    let users = summary.report("users").unwrap();
    assert_eq!((users.migrated_rows, users.renamed_rows), (3, 1));

    let groups = summary.report("groups").unwrap();
    assert_eq!((groups.migrated_rows, groups.renamed_rows), (2, 1));
    assert_eq!(
        ctx.text(r#"SELECT type FROM "group" WHERE id = 'g2'"#),
        Some("group".to_string())
    );
    assert_eq!(
        ctx.text(r#"SELECT state FROM "group" WHERE id = 'g2'"#),
        Some("active".to_string())
    );

    let packages = summary.report("packages").unwrap();
    assert_eq!((packages.migrated_rows, packages.skipped_rows), (2, 1));
    assert!(packages.errors.iter().any(|e| e.contains("u9")));

    let resources = summary.report("resources").unwrap();
    assert_eq!(resources.migrated_rows, 1);
    assert_eq!(ctx.count("resource"), 1);
    assert_eq!(
        ctx.text("SELECT metadata_modified FROM resource WHERE id = 'r1'"),
        Some("2017-02-03 10:00:00".to_string())
    );

    let members = summary.report("members").unwrap();
    assert_eq!((members.migrated_rows, members.skipped_rows), (2, 2));

    let ratings = summary.report("ratings").unwrap();
    assert_eq!(ratings.total_rows, 0);
    assert_eq!(ratings.warnings.len(), 1);
    assert!(ratings.warnings[0].contains("rating.csv not found"));
    assert!(summary.report("users").unwrap().warnings.iter().all(|w| !w.contains("not found")));

    let totals = summary.totals();
    assert_eq!(totals.total_rows, 14);
    assert_eq!(totals.migrated_rows + totals.skipped_rows, totals.total_rows);
}

#[test]
fn test_summary_is_archived_as_json() {
    let mut ctx = TestContext::new();
    write_legacy_snapshot(&ctx);
    let mut source = ctx.snapshot();
    let summary = MigrationDriver::new(catalog())
        .run(&mut source, &mut ctx.sink)
        .unwrap();

    let path = ctx.snapshot_dir.path().join("migration.log.json");
    summary.write_json(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(json["status"]["state"], "complete");
    assert_eq!(json["reports"]["packages"]["skipped_rows"], 1);
    assert_eq!(json["reports"]["packages"]["skipped"]["missing_parent"], 1);
    assert!(json["reports"]["users"]["warnings"][0]
        .as_str()
        .unwrap()
        .contains("renamed"));
}

#[test]
fn test_skip_deleted_cascades_to_children() {
    let mut ctx = TestContext::new();
    write_legacy_snapshot(&ctx);
    let mut source = ctx.snapshot();
    let config = MigrationConfig::new().with_migrate_deleted(false);

    let summary = MigrationDriver::new(catalog())
        .with_config(config)
        .run(&mut source, &mut ctx.sink)
        .unwrap();

    let users = summary.report("users").unwrap();
    assert_eq!(users.skipped_for(SkipReason::SoftDeleted), 1);

    let packages = summary.report("packages").unwrap();
    assert_eq!(packages.skipped_for(SkipReason::SoftDeleted), 1);
    assert_eq!(packages.migrated_rows, 1);
    assert_eq!(ctx.count("user"), 2);
}

#[test]
fn test_dry_run_commits_nothing() {
    let mut ctx = TestContext::new();
    write_legacy_snapshot(&ctx);
    let mut source = ctx.snapshot();

    let summary = MigrationDriver::new(catalog())
        .with_config(MigrationConfig::new().with_dry_run(true))
        .run(&mut source, &mut ctx.sink)
        .unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.report("packages").unwrap().migrated_rows, 2);
    assert_eq!(summary.report("resources").unwrap().migrated_rows, 1);
    assert_eq!(ctx.count("user"), 0);
    assert_eq!(ctx.count("package"), 0);
}

#[test]
fn test_unreadable_source_aborts_run() {
    let mut ctx = TestContext::new();
    let mut source = MemorySource::new()
        .with_table("user", scenario_a_users())
        .unreadable("vocabulary");

    let summary = MigrationDriver::new(catalog())
        .run(&mut source, &mut ctx.sink)
        .unwrap();

    match &summary.status {
        RunStatus::Aborted { entity, .. } => assert_eq!(entity, "vocabularies"),
        other => panic!("expected an aborted run, got {}", other),
    }
    assert_eq!(summary.reports.len(), 2);
    assert!(summary.report("users").is_some());
    assert!(summary.report("groups").is_some());
    assert_eq!(ctx.count("user"), 2);
    assert!(summary.to_string().contains("aborted during vocabularies"));
}

#[test]
fn test_only_selected_entities_run() {
    let mut ctx = TestContext::new();
    write_legacy_snapshot(&ctx);
    let mut source = ctx.snapshot();

    let summary = MigrationDriver::new(catalog())
        .with_config(MigrationConfig::new().with_only(["packages", "resources"]))
        .run(&mut source, &mut ctx.sink)
        .unwrap();

    assert_eq!(summary.order, vec!["packages", "resources"]);
    let packages = summary.report("packages").unwrap();
    assert_eq!(packages.migrated_rows, 3);
    assert_eq!(summary.report("resources").unwrap().migrated_rows, 2);
}
