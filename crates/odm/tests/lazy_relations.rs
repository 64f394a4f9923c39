mod common;

use common::*;
use elif_odm::prelude::*;
use elif_odm::{ErrorKind, ForPage};
use serde_json::json;

#[tokio::test]
async fn test_has_many_count_and_aggregates() {
    let db = database();
    let blog = seed_blog(&db).await;
    let comments = blog.post_a.comments();

    assert_eq!(comments.count(&db).await.unwrap(), 2);
    assert_eq!(comments.avg(&db, "likes").await.unwrap(), 7.5);
    assert_eq!(comments.sum(&db, "likes").await.unwrap(), 15.0);
    assert_eq!(comments.min(&db, "likes").await.unwrap(), 5.0);
    assert_eq!(comments.max(&db, "likes").await.unwrap(), 10.0);
    assert_eq!(blog.post_b.comments().count(&db).await.unwrap(), 1);
}

#[tokio::test]
async fn test_aggregates_over_no_matches_are_zero() {
    let db = database();
    let blog = seed_blog(&db).await;
    let none = blog.post_a.comments().where_gt("likes", 100);

    assert_eq!(none.count(&db).await.unwrap(), 0);
    assert_eq!(none.avg(&db, "likes").await.unwrap(), 0.0);
    assert!(!none.exists(&db).await.unwrap());
    assert!(none.first(&db).await.unwrap().is_none());
}

#[tokio::test]
async fn test_caller_predicates_combine_with_relation_filter() {
    let db = database();
    let blog = seed_blog(&db).await;

    let liked = blog
        .post_a
        .comments()
        .where_gt("likes", 6)
        .get(&db)
        .await
        .unwrap();
    assert_eq!(liked.len(), 1);
    assert_eq!(liked[0].get("content"), Some(&json!("great")));

    let inactive = blog.post_a.comments().where_eq("active", false).count(&db).await.unwrap();
    assert_eq!(inactive, 0);
}

#[tokio::test]
async fn test_or_predicates_stay_within_owner() {
    let db = database();
    let blog = seed_blog(&db).await;
    let either = blog
        .post_a
        .comments()
        .where_eq("active", false)
        .or_where_eq("likes", 5);

    assert_eq!(either.count(&db).await.unwrap(), 1);
    assert_eq!(either.sum(&db, "likes").await.unwrap(), 5.0);
    let found = either.get(&db).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("postId"), Some(&id_of(&blog.post_a).to_value()));

    let range = blog
        .post_b
        .comments()
        .where_between("likes", json!(4), json!(6))
        .or_where_between("likes", json!(9), json!(11));
    assert_eq!(range.count(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_pluck_sort_and_window() {
    let db = database();
    let blog = seed_blog(&db).await;

    let likes = blog
        .post_a
        .comments()
        .sort("likes", SortDirection::Desc)
        .pluck(&db, "likes")
        .await
        .unwrap();
    assert_eq!(likes, vec![json!(10), json!(5)]);

    let second = blog
        .post_a
        .comments()
        .order_by("likes", SortDirection::Asc)
        .skip(1)
        .limit(1)
        .get(&db)
        .await
        .unwrap();
    assert_eq!(second[0].get("likes"), Some(&json!(10)));
}

#[tokio::test]
async fn test_relation_pagination() {
    let db = database();
    let blog = seed_blog(&db).await;

    let page = blog.post_a.comments().paginate(&db, 2, 1).await.unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.last_page, 2);
    assert_eq!(page.data.len(), 1);
    assert!(!page.has_more_pages());

    let err = blog.post_a.comments().paginate(&db, 0, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn test_for_page_over_fetched_results() {
    let db = database();
    let blog = seed_blog(&db).await;
    for n in 0..8 {
        blog.post_b
            .comments()
            .create(&db, json!({ "content": format!("c{}", n), "likes": n }))
            .await
            .unwrap();
    }
    let comments = blog.post_b.comments().get(&db).await.unwrap();
    assert_eq!(comments.len(), 9);

    assert_eq!(comments.for_page(1, 3).unwrap().len(), 3);
    assert!(comments.for_page(4, 3).unwrap().is_empty());
    assert_eq!(
        comments.for_page(0, 3).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        comments.for_page(1, -3).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
}

#[tokio::test]
async fn test_belongs_to_resolves_parent_and_hides_fields() {
    let db = database();
    let blog = seed_blog(&db).await;

    let author = blog.post_a.author().first_or_fail(&db).await.unwrap();
    assert_eq!(id_of(&author), id_of(&blog.author));
    assert!(author.get("password").is_none());

    let visible = blog
        .post_a
        .author()
        .make_visible(["password"])
        .first(&db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(visible.get("password"), Some(&json!("secret")));
}

#[tokio::test]
async fn test_missing_owner_key_matches_nothing() {
    let db = database();
    seed_blog(&db).await;

    let orphan = Entity::<Post>::from_value(json!({ "title": "draft" })).unwrap();
    assert!(orphan.author().first(&db).await.unwrap().is_none());
    assert_eq!(orphan.comments().count(&db).await.unwrap(), 0);

    let err = orphan.comments().first_or_fail(&db).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_associate_and_dissociate() {
    let db = database();
    let blog = seed_blog(&db).await;
    let other = User::create(&db, json!({ "name": "Bob" })).await.unwrap();

    let mut post = Post::find_or_fail(&db, id_of(&blog.post_a)).await.unwrap();
    post.author().associate(&mut post, &other).unwrap();
    assert!(post.is_dirty_field("userId"));
    post.save(&db).await.unwrap();

    let stale = blog.post_a.author().first(&db).await.unwrap().unwrap();
    assert_eq!(id_of(&stale), id_of(&blog.author));
    let fresh = post.author().first(&db).await.unwrap().unwrap();
    assert_eq!(id_of(&fresh), id_of(&other));

    post.author().dissociate(&mut post).unwrap();
    post.save(&db).await.unwrap();
    post.refresh(&db).await.unwrap();
    assert!(post.get("userId").is_none());
    assert!(post.author().first(&db).await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_through_relations_sets_keys() {
    let db = database();
    let blog = seed_blog(&db).await;

    let profile = blog
        .author
        .profile()
        .create(&db, json!({ "bio": "writer" }))
        .await
        .unwrap();
    assert_eq!(profile.get("userId"), Some(&id_of(&blog.author).to_value()));

    let image = blog
        .post_a
        .image()
        .create(&db, json!({ "url": "a.png" }))
        .await
        .unwrap();
    assert_eq!(image.get("imageableType"), Some(&json!("Post")));
    assert_eq!(image.get("imageableId"), Some(&id_of(&blog.post_a).to_value()));

    let unsaved = Entity::<Post>::new();
    let err = unsaved
        .comments()
        .create(&db, json!({ "content": "lost" }))
        .await
        .unwrap_err();
    assert!(matches!(err, ModelError::MissingPrimaryKey));
}

#[tokio::test]
async fn test_morph_relations_respect_discriminator() {
    let db = database();
    let blog = seed_blog(&db).await;
    let video = Video::create(&db, json!({ "title": "clip" })).await.unwrap();

    blog.post_a
        .image()
        .create(&db, json!({ "url": "post.png" }))
        .await
        .unwrap();
    video
        .images()
        .create_many(&db, vec![json!({ "url": "v1.png" }), json!({ "url": "v2.png" })])
        .await
        .unwrap();
    Image::create(
        &db,
        json!({ "url": "forged.png", "imageableType": "Video", "imageableId": id_of(&blog.post_a).to_value() }),
    )
    .await
    .unwrap();

    let image = blog.post_a.image().first(&db).await.unwrap().unwrap();
    assert_eq!(image.get("url"), Some(&json!("post.png")));
    assert_eq!(video.images().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_has_many_through_skips_trashed_intermediates() {
    let db = database();
    let mut blog = seed_blog(&db).await;

    let posts = blog.country.posts().get(&db).await.unwrap();
    assert_eq!(ids(&posts), ids(&[blog.post_a.clone(), blog.post_b.clone()]));

    blog.author.delete(&db).await.unwrap();
    assert_eq!(blog.country.posts().count(&db).await.unwrap(), 0);
}

#[tokio::test]
async fn test_soft_delete_modes_on_relation_handles() {
    let db = database();
    let blog = seed_blog(&db).await;
    let mut doomed = blog.post_a.comments().where_eq("likes", 5).first_or_fail(&db).await.unwrap();
    doomed.delete(&db).await.unwrap();
    assert!(doomed.is_trashed());

    assert_eq!(blog.post_a.comments().count(&db).await.unwrap(), 1);
    assert_eq!(blog.post_a.comments().with_trashed().count(&db).await.unwrap(), 2);

    let trashed = blog.post_a.comments().only_trashed().get(&db).await.unwrap();
    assert_eq!(trashed.len(), 1);
    assert!(trashed[0].get("deletedAt").is_some());

    doomed.restore(&db).await.unwrap();
    assert_eq!(blog.post_a.comments().count(&db).await.unwrap(), 2);
}

#[tokio::test]
async fn test_lazy_pipeline_is_inspectable() {
    let db = database();
    let blog = seed_blog(&db).await;

    let stages = blog.post_a.comments().where_gt("likes", 1).to_pipeline(&db).await.unwrap();
    assert_eq!(
        stages[0].as_value(),
        &json!({ "$match": { "isDeleted": false } })
    );
    assert_eq!(
        stages[1].as_value(),
        &json!({ "$match": { "$and": [{ "postId": { "$eq": id_of(&blog.post_a).to_value() } }] } })
    );
    assert_eq!(
        stages[2].as_value(),
        &json!({ "$match": { "$and": [{ "likes": { "$gt": 1 } }] } })
    );
}
