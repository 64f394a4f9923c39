mod common;

use common::*;
use elif_odm::prelude::*;
use elif_odm::relationships::{PivotPlan, PivotReconciler};
use elif_odm::{DocumentCollection, ErrorKind};
use serde_json::{json, Map, Value};

fn role_ids(roles: &[Entity<Role>]) -> Vec<DocumentId> {
    roles.iter().map(id_of).collect()
}

fn active_rows(db: &MemoryDatabase, collection: &str) -> Vec<Map<String, Value>> {
    db.dump(collection)
        .into_iter()
        .filter(|row| row.get("isDeleted") != Some(&json!(true)))
        .collect()
}

#[tokio::test]
async fn test_attach_then_sync_leaves_one_row() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin", "editor"]).await;
    let ids = role_ids(&roles);

    let changes = blog.author.roles().attach(&db, ids.clone()).await.unwrap();
    assert_eq!(changes.attached, ids);
    assert_eq!(db.dump("role_user").len(), 2);

    let changes = blog.author.roles().sync(&db, [ids[0]]).await.unwrap();
    assert!(changes.attached.is_empty());
    assert_eq!(changes.detached, vec![ids[1]]);

    let rows = db.dump("role_user");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("roleId"), Some(&ids[0].to_value()));
    assert_eq!(rows[0].get("userId"), Some(&id_of(&blog.author).to_value()));
    assert_eq!(rows[0].get("isDeleted"), Some(&json!(false)));
}

#[tokio::test]
async fn test_sync_is_idempotent_and_silent_the_second_time() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin", "editor", "viewer"]).await;
    let ids = role_ids(&roles);

    let first = blog.author.roles().sync(&db, ids[..2].to_vec()).await.unwrap();
    assert_eq!(first.attached.len(), 2);
    let after_first = db.dump("role_user");

    db.reset_write_count();
    let second = blog.author.roles().sync(&db, ids[..2].to_vec()).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(db.write_count(), 0);
    assert_eq!(db.dump("role_user"), after_first);
}

#[tokio::test]
async fn test_attach_is_idempotent() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin"]).await;

    blog.author.roles().attach(&db, role_ids(&roles)).await.unwrap();
    db.reset_write_count();
    let again = blog.author.roles().attach(&db, role_ids(&roles)).await.unwrap();

    assert!(again.is_empty());
    assert_eq!(db.write_count(), 0);
    assert_eq!(db.dump("role_user").len(), 1);
}

#[tokio::test]
async fn test_attach_detach_reattach() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin", "editor"]).await;
    let ids = role_ids(&roles);
    let user_roles = blog.author.roles();

    user_roles.attach(&db, ids.clone()).await.unwrap();
    let detached = user_roles.detach(&db, [ids[1]]).await.unwrap();
    assert_eq!(detached.detached, vec![ids[1]]);
    assert_eq!(user_roles.count(&db).await.unwrap(), 1);

    let reattached = user_roles.attach(&db, [ids[1]]).await.unwrap();
    assert_eq!(reattached.attached, vec![ids[1]]);
    assert_eq!(user_roles.count(&db).await.unwrap(), 2);

    let cleared = user_roles.detach_all(&db).await.unwrap();
    assert_eq!(cleared.detached.len(), 2);
    assert!(db.dump("role_user").is_empty());
}

#[tokio::test]
async fn test_detach_of_unknown_ids_writes_nothing() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin", "editor"]).await;

    blog.author.roles().attach(&db, [id_of(&roles[0])]).await.unwrap();
    db.reset_write_count();
    let changes = blog.author.roles().detach(&db, [id_of(&roles[1])]).await.unwrap();

    assert!(changes.is_empty());
    assert_eq!(db.write_count(), 0);
}

#[tokio::test]
async fn test_attach_restores_soft_deleted_row_without_overwriting_it() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin"]).await;
    let role = id_of(&roles[0]);

    let mut row = Map::new();
    row.insert("userId".to_string(), id_of(&blog.author).to_value());
    row.insert("roleId".to_string(), role.to_value());
    row.insert("level".to_string(), json!("owner"));
    row.insert("isDeleted".to_string(), json!(true));
    row.insert("deletedAt".to_string(), json!("2024-01-01T00:00:00.000Z"));
    db.collection("role_user").insert_one(row).await.unwrap();

    assert_eq!(blog.author.roles().count(&db).await.unwrap(), 0);
    let snapshot = blog.author.roles().pivot_snapshot(&db).await.unwrap();
    assert!(snapshot.is_trashed(&role));

    let changes = blog
        .author
        .roles()
        .attach_with(&db, [role], json!({ "level": "guest" }))
        .await
        .unwrap();
    assert_eq!(changes.restored, vec![role]);
    assert!(changes.attached.is_empty());

    let rows = db.dump("role_user");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("isDeleted"), Some(&json!(false)));
    assert_eq!(rows[0].get("level"), Some(&json!("owner")));
    assert!(rows[0].get("deletedAt").is_none());
    assert_eq!(blog.author.roles().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_attach_with_seeds_extra_attributes_on_insert() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin"]).await;

    blog.author
        .roles()
        .attach_with(&db, role_ids(&roles), json!({ "level": "owner", "userId": "ignored" }))
        .await
        .unwrap();

    let rows = db.dump("role_user");
    assert_eq!(rows[0].get("level"), Some(&json!("owner")));
    assert_eq!(rows[0].get("userId"), Some(&id_of(&blog.author).to_value()));

    let err = blog
        .author
        .roles()
        .attach_with(&db, role_ids(&roles), json!(["not", "an", "object"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_toggle_twice_returns_to_start() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin", "editor"]).await;
    let ids = role_ids(&roles);
    let user_roles = blog.author.roles();

    user_roles.attach(&db, [ids[0]]).await.unwrap();

    let first = user_roles.toggle(&db, ids.clone()).await.unwrap();
    assert_eq!(first.detached, vec![ids[0]]);
    assert_eq!(first.attached, vec![ids[1]]);

    let second = user_roles.toggle(&db, ids.clone()).await.unwrap();
    assert_eq!(second.detached, vec![ids[1]]);
    assert_eq!(second.attached, vec![ids[0]]);

    let current = user_roles.get(&db).await.unwrap();
    assert_eq!(current.len(), 1);
    assert_eq!(id_of(&current[0]), ids[0]);
}

#[tokio::test]
async fn test_sync_without_detaching_keeps_existing_rows() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin", "editor"]).await;
    let ids = role_ids(&roles);

    blog.author.roles().attach(&db, [ids[0]]).await.unwrap();
    let changes = blog
        .author
        .roles()
        .sync_without_detaching_with(&db, [ids[0], ids[1]], json!({ "level": "editor" }))
        .await
        .unwrap();

    assert_eq!(changes.attached, vec![ids[1]]);
    assert!(changes.detached.is_empty());
    let rows = active_rows(&db, "role_user");
    assert_eq!(rows.len(), 2);
    for row in &rows {
        let expected = if row.get("roleId") == Some(&ids[1].to_value()) {
            Some(json!("editor"))
        } else {
            None
        };
        assert_eq!(row.get("level").cloned(), expected);
    }

    let again = blog
        .author
        .roles()
        .sync_without_detaching(&db, [ids[1]])
        .await
        .unwrap();
    assert!(again.is_empty());
    assert_eq!(active_rows(&db, "role_user").len(), 2);
}

#[tokio::test]
async fn test_malformed_and_duplicate_ids() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin"]).await;
    let role = id_of(&roles[0]);

    let err = blog.author.roles().attach(&db, ["not-a-uuid"]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(db.dump("role_user").is_empty());

    let braced = format!("{{{}}}", role.to_canonical().to_uppercase());
    let changes = blog
        .author
        .roles()
        .attach(&db, vec![role.to_canonical(), braced])
        .await
        .unwrap();
    assert_eq!(changes.attached, vec![role]);
    assert_eq!(db.dump("role_user").len(), 1);
}

#[tokio::test]
async fn test_unsaved_owner_cannot_reconcile() {
    let db = database();
    let roles = seed_roles(&db, &["admin"]).await;
    let user = Entity::<User>::new();

    let err = user.roles().attach(&db, role_ids(&roles)).await.unwrap_err();
    assert!(matches!(err, ModelError::MissingPrimaryKey));
}

#[tokio::test]
async fn test_morph_pivot_rows_carry_the_owner_type() {
    let db = database();
    let blog = seed_blog(&db).await;
    let video = Video::create(&db, json!({ "title": "clip" })).await.unwrap();
    let tags = Tag::insert_many(&db, vec![json!({ "name": "rust" }), json!({ "name": "db" })])
        .await
        .unwrap();
    let tag_ids: Vec<DocumentId> = tags.iter().map(id_of).collect();

    blog.post_a.tags().sync(&db, tag_ids.clone()).await.unwrap();
    video.tags().attach(&db, [tag_ids[0]]).await.unwrap();

    let rows = db.dump("taggables");
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows.iter().filter(|r| r.get("taggableType") == Some(&json!("Post"))).count(),
        2
    );

    // syncing the video must not touch the post's rows
    video.tags().sync(&db, Vec::<DocumentId>::new()).await.unwrap();
    assert_eq!(db.dump("taggables").len(), 2);
    assert_eq!(blog.post_a.tags().count(&db).await.unwrap(), 2);

    let first_tag = &tags[0];
    let posts = first_tag.posts().get(&db).await.unwrap();
    assert_eq!(ids(&posts), ids(&[blog.post_a.clone()]));
    assert_eq!(first_tag.videos().count(&db).await.unwrap(), 0);

    let detached = first_tag.posts().detach(&db, [id_of(&blog.post_a)]).await.unwrap();
    assert_eq!(detached.detached, vec![id_of(&blog.post_a)]);
    assert_eq!(blog.post_a.tags().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_custom_pivot_model_and_keys() {
    struct Membership;

    impl Model for Membership {
        fn type_name() -> &'static str {
            "Membership"
        }

        fn collection_name() -> &'static str {
            "memberships"
        }

        fn uses_timestamps() -> bool {
            true
        }
    }

    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin"]).await;

    let memberships = blog
        .author
        .roles()
        .using::<Membership>()
        .foreign_pivot_key("memberId");
    memberships.attach(&db, role_ids(&roles)).await.unwrap();

    let rows = db.dump("memberships");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("memberId"), Some(&id_of(&blog.author).to_value()));
    assert!(rows[0].get("createdAt").is_some());
    assert!(rows[0].get("isDeleted").is_none());
    assert_eq!(memberships.count(&db).await.unwrap(), 1);
    assert!(db.dump("role_user").is_empty());
}

/// Reconciliation is a read followed by separate writes. A plan computed
/// from a stale snapshot does not see rows written in between.
#[tokio::test]
async fn test_stale_snapshot_race_is_not_isolated() {
    let db = database();
    let blog = seed_blog(&db).await;
    let roles = seed_roles(&db, &["admin", "editor"]).await;
    let ids = role_ids(&roles);

    let user_roles = blog.author.roles();
    let keys = user_roles.descriptor().pivot().cloned().unwrap();
    let reconciler = PivotReconciler::new(&db, &keys, id_of(&blog.author).to_value());

    // first caller plans sync([admin]) against an empty pivot
    let stale = reconciler.snapshot().await.unwrap();
    let plan = PivotPlan::sync(&stale, &[ids[0]], true);

    // a concurrent caller attaches both roles before the plan is applied
    user_roles.attach(&db, ids.clone()).await.unwrap();

    let changes = reconciler.apply(&plan, &Map::new()).await.unwrap();

    // the upsert does not duplicate admin, but editor survives the sync
    assert!(changes.attached.is_empty());
    let rows = db.dump("role_user");
    assert_eq!(rows.len(), 2);
    assert_eq!(user_roles.count(&db).await.unwrap(), 2);
}
