//! The CKAN entity catalog: legacy (2.2 era) tables into the 2.11 schema.
//!
//! Entities are declared in import order. Deprecated legacy columns
//! (`revision_id` on most tables, `webstore_url` and `webstore_last_updated`
//! on resources) have no target field and are dropped. The `revision` table
//! itself no longer exists in the target and is not migrated.

use crate::descriptor::{EntityDescriptor, FieldDef, NaturalKey, ParentRef, RowFilter};
use crate::value::{Row, Value};
use chrono::NaiveDate;

/// Every migrated entity type, in import order.
pub fn catalog() -> Vec<EntityDescriptor> {
    vec![
        EntityDescriptor::new("users", "user")
            .with_copied(&[
                "id", "name", "email", "about", "created", "fullname", "sysadmin", "state",
            ])
            .with_natural_key(NaturalKey::email("email"))
            .with_soft_delete(true)
            .ordered_by(&["created"]),
        EntityDescriptor::new("groups", "group")
            .with_copied(&["id", "name", "title", "description", "created"])
            .with_field(FieldDef::with_default("state", "active"))
            .with_field(FieldDef::with_default("type", "group"))
            .with_copied(&["approval_status", "image_url", "is_organization"])
            .with_natural_key(NaturalKey::name("name"))
            .with_soft_delete(true)
            .ordered_by(&["created"]),
        EntityDescriptor::new("vocabularies", "vocabulary")
            .with_copied(&["id", "name"])
            .with_natural_key(NaturalKey::name("name")),
        EntityDescriptor::new("tags", "tag")
            .with_copied(&["id", "name", "vocabulary_id"])
            .with_parent(ParentRef::new("vocabularies", "vocabulary_id"))
            .with_natural_key(NaturalKey::name("name").scoped_by("vocabulary_id")),
        EntityDescriptor::new("packages", "package")
            .with_copied(&[
                "id",
                "name",
                "title",
                "version",
                "url",
                "notes",
                "license_id",
                "author",
                "author_email",
                "maintainer",
                "maintainer_email",
                "state",
                "type",
                "owner_org",
                "private",
                "metadata_modified",
                "creator_user_id",
                "metadata_created",
            ])
            .with_parent(ParentRef::new("users", "creator_user_id"))
            .with_parent(ParentRef::new("groups", "owner_org"))
            .with_natural_key(NaturalKey::name("name"))
            .with_soft_delete(true)
            .ordered_by(&["metadata_created"]),
        EntityDescriptor::new("resources", "resource")
            .with_copied(&[
                "id",
                "url",
                "format",
                "description",
                "position",
                "hash",
                "state",
                "extras",
                "name",
                "resource_type",
                "mimetype",
                "mimetype_inner",
                "size",
                "last_modified",
                "cache_url",
                "cache_last_updated",
                "created",
                "url_type",
                "package_id",
            ])
            .with_field(FieldDef::with_fallback("metadata_modified", "created"))
            .with_parent(ParentRef::new("packages", "package_id"))
            .with_soft_delete(true)
            .ordered_by(&["created"]),
        EntityDescriptor::new("package_extras", "package_extra")
            .with_copied(&["id", "package_id", "key", "value", "state"])
            .with_parent(ParentRef::new("packages", "package_id"))
            .with_soft_delete(true),
        EntityDescriptor::new("package_tags", "package_tag")
            .with_copied(&["id", "package_id", "tag_id", "state"])
            .with_parent(ParentRef::new("packages", "package_id"))
            .with_parent(ParentRef::new("tags", "tag_id"))
            .with_soft_delete(true),
        EntityDescriptor::new("members", "member")
            .with_copied(&["id", "table_id", "group_id", "state", "table_name", "capacity"])
            .with_parent(ParentRef::new("users", "table_id").only_when("table_name", "user"))
            .with_parent(ParentRef::new("packages", "table_id").only_when("table_name", "package"))
            .with_parent(ParentRef::new("groups", "group_id"))
            .with_soft_delete(true),
        EntityDescriptor::new("group_extras", "group_extra")
            .with_copied(&["id", "group_id", "key", "value", "state"])
            .with_parent(ParentRef::new("groups", "group_id"))
            .with_soft_delete(true),
        EntityDescriptor::new("resource_views", "resource_view")
            .with_copied(&[
                "id",
                "resource_id",
                "title",
                "description",
                "view_type",
                "order",
                "config",
            ])
            .with_parent(ParentRef::new("resources", "resource_id"))
            .ordered_by(&["order"]),
        EntityDescriptor::new("activities", "activity")
            .with_copied(&[
                "id",
                "timestamp",
                "user_id",
                "object_id",
                "revision_id",
                "activity_type",
                "data",
            ])
            .with_field(FieldDef::constant(
                "permission_labels",
                Value::TextArray(vec!["public".to_string()]),
            ))
            .with_parent(ParentRef::new("users", "user_id"))
            .after("packages")
            .after("groups")
            .ordered_by(&["timestamp"]),
        EntityDescriptor::new("activity_details", "activity_detail")
            .with_copied(&[
                "id",
                "activity_id",
                "object_id",
                "object_type",
                "activity_type",
                "data",
            ])
            .with_parent(ParentRef::new("activities", "activity_id")),
        EntityDescriptor::new("dashboards", "dashboard")
            .with_copied(&["user_id", "activity_stream_last_viewed", "email_last_sent"])
            .with_key(&["user_id"])
            .with_parent(ParentRef::new("users", "user_id")),
        EntityDescriptor::new("system_info", "system_info")
            .with_copied(&["id", "key", "value", "state"])
            .with_soft_delete(true)
            .ordered_by(&["id"]),
        EntityDescriptor::new("task_status", "task_status")
            .with_copied(&[
                "id",
                "entity_id",
                "entity_type",
                "task_type",
                "key",
                "value",
                "state",
                "error",
                "last_updated",
            ])
            .ordered_by(&["last_updated"]),
        EntityDescriptor::new("user_following_groups", "user_following_group")
            .with_copied(&["follower_id", "object_id", "datetime"])
            .with_key(&["follower_id", "object_id"])
            .with_parent(ParentRef::new("users", "follower_id"))
            .with_parent(ParentRef::new("groups", "object_id"))
            .ordered_by(&["datetime"]),
        EntityDescriptor::new("user_following_datasets", "user_following_dataset")
            .with_copied(&["follower_id", "object_id", "datetime"])
            .with_key(&["follower_id", "object_id"])
            .with_parent(ParentRef::new("users", "follower_id"))
            .with_parent(ParentRef::new("packages", "object_id"))
            .ordered_by(&["datetime"]),
        EntityDescriptor::new("package_relationships", "package_relationship")
            .with_copied(&[
                "id",
                "subject_package_id",
                "object_package_id",
                "type",
                "comment",
                "state",
            ])
            .with_parent(ParentRef::new("packages", "subject_package_id"))
            .with_parent(ParentRef::new("packages", "object_package_id"))
            .with_soft_delete(true),
        EntityDescriptor::new("ratings", "rating")
            .with_copied(&["id", "user_id", "user_ip_address", "package_id", "rating", "created"])
            .with_parent(ParentRef::new("users", "user_id"))
            .with_parent(ParentRef::new("packages", "package_id")),
        EntityDescriptor::new("term_translations", "term_translation")
            .with_copied(&["term", "term_translation", "lang_code"])
            .with_key(&["term", "lang_code"])
            .ordered_by(&["term", "lang_code"]),
        EntityDescriptor::new("tracking_raw", "tracking_raw")
            .with_copied(&["user_key", "url", "tracking_type", "access_timestamp"])
            .with_key(&["user_key", "url", "tracking_type", "access_timestamp"])
            .keep_existing()
            .ordered_by(&["access_timestamp"]),
    ]
}

/// Look up an entity of the catalog by name.
pub fn entity<'a>(catalog: &'a [EntityDescriptor], name: &str) -> Option<&'a EntityDescriptor> {
    catalog.iter().find(|e| e.name == name)
}

/// Attach a customization rule to one entity of a catalog.
pub fn add_filter(catalog: &mut [EntityDescriptor], name: &str, filter: RowFilter) -> bool {
    match catalog.iter_mut().find(|e| e.name == name) {
        Some(entity) => {
            entity.filters.push(filter);
            true
        }
        None => false,
    }
}

/// Exclude users that filled in their profile description.
pub fn exclude_users_with_about() -> RowFilter {
    RowFilter::new("users-with-about", |row: &Row| match row.get("about") {
        Value::Null => false,
        Value::Text(about) => !about.is_empty(),
        _ => true,
    })
}

/// Exclude rows created after `cutoff` (by calendar date).
///
/// Rows without a readable `created` date are kept.
pub fn exclude_created_after(cutoff: NaiveDate) -> RowFilter {
    RowFilter::new(format!("created-after-{}", cutoff), move |row: &Row| {
        created_date(row).is_some_and(|date| date > cutoff)
    })
}

fn created_date(row: &Row) -> Option<NaiveDate> {
    match row.get("created") {
        Value::Timestamp(t) => Some(t.date()),
        Value::Text(text) => {
            let day = text.split([' ', 'T']).next()?;
            NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
        }
        _ => None,
    }
}
