//! Pipeline shape tests for every relationship kind
//!
//! These compile eager loads against a small set of models and compare the
//! emitted stages with the expected aggregation documents.

use serde_json::{json, Value};

use crate::error::ModelError;
use crate::model::{Entity, Model};
use crate::query::{pipeline_to_value, QueryBuilder, SortDirection};
use crate::relationships::{RelationOptions, RelationRegistry, RelationshipType};

struct User;
struct Profile;
struct Post;
struct Comment;
struct Role;
struct Country;
struct Image;
struct Tag;

impl Model for User {
    fn type_name() -> &'static str {
        "User"
    }

    fn collection_name() -> &'static str {
        "users"
    }

    fn hidden() -> &'static [&'static str] {
        &["password"]
    }

    fn relations(relations: &mut RelationRegistry<Self>) {
        relations
            .define("profile", |user| user.has_one::<Profile>())
            .define("posts", |user| user.has_many::<Post>())
            .define("roles", |user| user.belongs_to_many::<Role>())
            .define("articles", |user| user.has_many::<Post>().alias("posts"));
    }
}

impl Model for Profile {
    fn type_name() -> &'static str {
        "Profile"
    }

    fn collection_name() -> &'static str {
        "profiles"
    }
}

impl Model for Post {
    fn type_name() -> &'static str {
        "Post"
    }

    fn collection_name() -> &'static str {
        "posts"
    }

    fn relations(relations: &mut RelationRegistry<Self>) {
        relations
            .define("author", |post| post.belongs_to::<User>())
            .define("comments", |post| post.has_many::<Comment>())
            .define("image", |post| post.morph_to::<Image>("imageable"))
            .define("images", |post| post.morph_many::<Image>("imageable"))
            .define("tags", |post| post.morph_to_many::<Tag>("taggable"))
            .define("allComments", |post| post.has_many::<Comment>().with_trashed());
    }
}

impl Model for Comment {
    fn type_name() -> &'static str {
        "Comment"
    }

    fn collection_name() -> &'static str {
        "comments"
    }

    fn uses_soft_deletes() -> bool {
        true
    }
}

impl Model for Role {
    fn type_name() -> &'static str {
        "Role"
    }

    fn collection_name() -> &'static str {
        "roles"
    }
}

impl Model for Country {
    fn type_name() -> &'static str {
        "Country"
    }

    fn collection_name() -> &'static str {
        "countries"
    }

    fn relations(relations: &mut RelationRegistry<Self>) {
        relations.define("posts", |country| country.has_many_through::<Post, User>());
    }
}

impl Model for Image {
    fn type_name() -> &'static str {
        "Image"
    }

    fn collection_name() -> &'static str {
        "images"
    }
}

impl Model for Tag {
    fn type_name() -> &'static str {
        "Tag"
    }

    fn collection_name() -> &'static str {
        "tags"
    }

    fn relations(relations: &mut RelationRegistry<Self>) {
        relations.define("posts", |tag| tag.morphed_by_many::<Post>("taggable"));
    }
}

fn pipeline<M: Model>(query: QueryBuilder<M>) -> Value {
    pipeline_to_value(&query.to_pipeline().unwrap())
}

#[test]
fn test_has_one_unwinds_single_lookup() {
    assert_eq!(
        pipeline(QueryBuilder::<User>::new().with("profile")),
        json!([
            { "$lookup": { "from": "profiles", "localField": "_id", "foreignField": "userId", "as": "profile" } },
            { "$unwind": { "path": "$profile", "preserveNullAndEmptyArrays": true } }
        ])
    );
}

#[test]
fn test_belongs_to_joins_from_owner_foreign_key() {
    assert_eq!(
        pipeline(QueryBuilder::<Post>::new().with("author")),
        json!([
            { "$lookup": { "from": "users", "localField": "userId", "foreignField": "_id", "as": "author" } },
            { "$unwind": { "path": "$author", "preserveNullAndEmptyArrays": true } },
            { "$project": { "author.password": 0 } }
        ])
    );
}

#[test]
fn test_has_many_keeps_array_and_filters_trashed() {
    assert_eq!(
        pipeline(QueryBuilder::<Post>::new().with("comments")),
        json!([
            { "$lookup": {
                "from": "comments", "localField": "_id", "foreignField": "postId", "as": "comments",
                "pipeline": [{ "$match": { "$expr": { "$and": [{ "$eq": ["$isDeleted", false] }] } } }]
            } }
        ])
    );
}

#[test]
fn test_relation_with_trashed_drops_related_filter() {
    let stages = pipeline(QueryBuilder::<Post>::new().with("allComments"));
    assert_eq!(
        stages,
        json!([
            { "$lookup": { "from": "comments", "localField": "_id", "foreignField": "postId", "as": "allComments" } }
        ])
    );
}

#[test]
fn test_parent_trashed_mode_does_not_leak_into_relations() {
    let stages = pipeline(QueryBuilder::<Post>::new().with_trashed().with("comments"));
    assert_eq!(
        stages[0]["$lookup"]["pipeline"],
        json!([{ "$match": { "$expr": { "$and": [{ "$eq": ["$isDeleted", false] }] } } }])
    );
}

#[test]
fn test_belongs_to_many_chains_pivot_and_related() {
    assert_eq!(
        pipeline(QueryBuilder::<User>::new().with("roles")),
        json!([
            { "$lookup": {
                "from": "role_user", "localField": "_id", "foreignField": "userId", "as": "roles_pivot",
                "pipeline": [{ "$match": { "$expr": { "$and": [{ "$eq": ["$isDeleted", false] }] } } }]
            } },
            { "$lookup": { "from": "roles", "localField": "roles_pivot.roleId", "foreignField": "_id", "as": "roles" } },
            { "$project": { "roles_pivot": 0 } }
        ])
    );
}

#[test]
fn test_has_many_through_drops_intermediate() {
    assert_eq!(
        pipeline(QueryBuilder::<Country>::new().with("posts")),
        json!([
            { "$lookup": { "from": "users", "localField": "_id", "foreignField": "countryId", "as": "posts_through" } },
            { "$lookup": { "from": "posts", "localField": "posts_through._id", "foreignField": "userId", "as": "posts" } },
            { "$project": { "posts_through": 0 } }
        ])
    );
}

#[test]
fn test_morph_to_filters_on_discriminator() {
    assert_eq!(
        pipeline(QueryBuilder::<Post>::new().with("image")),
        json!([
            { "$lookup": {
                "from": "images", "localField": "_id", "foreignField": "imageableId", "as": "image",
                "pipeline": [{ "$match": { "$expr": { "$and": [{ "$eq": ["$imageableType", "Post"] }] } } }]
            } },
            { "$unwind": { "path": "$image", "preserveNullAndEmptyArrays": true } }
        ])
    );
}

#[test]
fn test_morph_many_has_no_unwind() {
    let stages = pipeline(QueryBuilder::<Post>::new().with("images"));
    let stages = stages.as_array().unwrap();
    assert_eq!(stages.len(), 1);
    assert_eq!(stages[0]["$lookup"]["as"], json!("images"));
}

#[test]
fn test_morph_to_many_and_inverse_share_the_morph_collection() {
    let forward = pipeline(QueryBuilder::<Post>::new().with("tags"));
    assert_eq!(
        forward,
        json!([
            { "$lookup": {
                "from": "taggables", "localField": "_id", "foreignField": "taggableId", "as": "tags_pivot",
                "pipeline": [{ "$match": { "$expr": { "$and": [{ "$eq": ["$taggableType", "Post"] }] } } }]
            } },
            { "$lookup": { "from": "tags", "localField": "tags_pivot.tagId", "foreignField": "_id", "as": "tags" } },
            { "$project": { "tags_pivot": 0 } }
        ])
    );

    let inverse = pipeline(QueryBuilder::<Tag>::new().with("posts"));
    assert_eq!(inverse[0]["$lookup"]["from"], json!("taggables"));
    assert_eq!(inverse[0]["$lookup"]["foreignField"], json!("tagId"));
    assert_eq!(inverse[1]["$lookup"]["localField"], json!("posts_pivot.taggableId"));
}

#[test]
fn test_nested_loads_compile_inside_sub_pipeline() {
    let stages = pipeline(QueryBuilder::<User>::new().with("posts.comments"));
    let sub = &stages[0]["$lookup"]["pipeline"];
    assert_eq!(sub[0]["$lookup"]["from"], json!("comments"));
    assert_eq!(sub[0]["$lookup"]["as"], json!("comments"));
}

#[test]
fn test_select_wins_over_exclude() {
    let options = RelationOptions::new().select(["name"]).exclude(["email"]);
    let stages = pipeline(QueryBuilder::<Post>::new().with_options("author", options));
    assert_eq!(
        stages[2],
        json!({ "$project": { "_document": "$$ROOT", "author.name": 1 } })
    );
    assert_eq!(
        stages[3],
        json!({ "$replaceRoot": { "newRoot": { "$mergeObjects": ["$_document", { "author": "$author" }] } } })
    );
}

#[test]
fn test_make_visible_removes_hidden_projection() {
    let options = RelationOptions::new().make_visible(["password"]);
    let stages = pipeline(QueryBuilder::<Post>::new().with_options("author", options));
    assert_eq!(stages.as_array().unwrap().len(), 2);
}

#[test]
fn test_options_sort_and_window_go_into_sub_pipeline() {
    let options = RelationOptions::new().sort("createdAt", SortDirection::Desc).skip(1).limit(2);
    let stages = pipeline(QueryBuilder::<Post>::new().with_options("comments", options));
    let sub = stages[0]["$lookup"]["pipeline"].as_array().unwrap().clone();
    assert_eq!(sub.len(), 4);
    assert_eq!(sub[1], json!({ "$sort": { "createdAt": -1 } }));
    assert_eq!(sub[2], json!({ "$skip": 1 }));
    assert_eq!(sub[3], json!({ "$limit": 2 }));
}

#[test]
fn test_predicate_on_alias_moves_lookups_first() {
    let stages = pipeline(QueryBuilder::<Post>::new().with("author").where_eq("author.name", "Ann"));
    assert_eq!(stages[0]["$lookup"]["as"], json!("author"));
    assert!(stages.as_array().unwrap().iter().any(|s| s.get("$match").is_some()));

    let plain = pipeline(QueryBuilder::<Post>::new().with("author").where_eq("title", "x"));
    assert!(plain[0].get("$match").is_some());
}

#[test]
fn test_duplicate_alias_is_a_query_error() {
    let err = QueryBuilder::<User>::new()
        .with("posts")
        .with("articles")
        .to_pipeline()
        .unwrap_err();
    assert!(matches!(err, ModelError::Query(_)));
}

#[test]
fn test_unknown_relation_fails_fast() {
    let err = QueryBuilder::<User>::new().with("friends").to_pipeline().unwrap_err();
    assert!(matches!(err, ModelError::RelationNotFound { .. }));
}

#[test]
fn test_registry_descriptors_keep_their_kind() {
    let user = Entity::<User>::new();
    assert_eq!(user.relation("roles").unwrap().kind, RelationshipType::BelongsToMany);
    assert_eq!(user.relation("articles").unwrap().alias(), "posts");
    assert!(user.relation("missing").is_err());
}

#[test]
fn test_relation_handles_debug_without_model_debug() {
    let user = Entity::<User>::new();
    let handle = user.has_many::<Post>().where_eq("title", "x");
    let printed = format!("{:?}", handle);
    assert!(printed.starts_with("RelationQuery"));
    assert!(printed.contains("QueryBuilder"));
    assert!(format!("{:?}", QueryBuilder::<Post>::new()).contains("conditions"));
}

#[test]
fn test_scope_terms_match_ahead_of_or_groups() {
    let scope = QueryBuilder::<Comment>::new().where_eq("postId", "p1");
    let query = QueryBuilder::<Comment>::new()
        .where_eq("active", false)
        .or_where_eq("likes", 5)
        .scoped_by(scope);

    assert_eq!(
        pipeline(query),
        json!([
            { "$match": { "isDeleted": false } },
            { "$match": { "$and": [{ "postId": { "$eq": "p1" } }] } },
            { "$match": { "$or": [
                { "$and": [{ "active": { "$eq": false } }] },
                { "$and": [{ "likes": { "$eq": 5 } }] }
            ] } }
        ])
    );
}
