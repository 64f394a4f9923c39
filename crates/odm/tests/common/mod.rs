//! Shared models and seed data for the integration tests

#![allow(dead_code)]

use elif_odm::prelude::*;
use elif_odm::{
    BelongsTo, BelongsToMany, HasMany, HasManyThrough, HasOne, MorphMany, MorphTo, MorphToMany,
    MorphedByMany,
};
use serde_json::json;

pub struct User;
pub struct Profile;
pub struct Post;
pub struct Comment;
pub struct Role;
pub struct Country;
pub struct Image;
pub struct Video;
pub struct Tag;

pub trait UserRelations {
    fn profile(&self) -> HasOne<User, Profile>;
    fn posts(&self) -> HasMany<User, Post>;
    fn roles(&self) -> BelongsToMany<User, Role>;
}

impl UserRelations for Entity<User> {
    fn profile(&self) -> HasOne<User, Profile> {
        self.has_one::<Profile>()
    }

    fn posts(&self) -> HasMany<User, Post> {
        self.has_many::<Post>()
    }

    fn roles(&self) -> BelongsToMany<User, Role> {
        self.belongs_to_many::<Role>()
    }
}

pub trait PostRelations {
    fn author(&self) -> BelongsTo<Post, User>;
    fn comments(&self) -> HasMany<Post, Comment>;
    fn image(&self) -> MorphTo<Post, Image>;
    fn tags(&self) -> MorphToMany<Post, Tag>;
}

impl PostRelations for Entity<Post> {
    fn author(&self) -> BelongsTo<Post, User> {
        self.belongs_to::<User>()
    }

    fn comments(&self) -> HasMany<Post, Comment> {
        self.has_many::<Comment>()
    }

    fn image(&self) -> MorphTo<Post, Image> {
        self.morph_to::<Image>("imageable")
    }

    fn tags(&self) -> MorphToMany<Post, Tag> {
        self.morph_to_many::<Tag>("taggable")
    }
}

pub trait VideoRelations {
    fn images(&self) -> MorphMany<Video, Image>;
    fn tags(&self) -> MorphToMany<Video, Tag>;
}

impl VideoRelations for Entity<Video> {
    fn images(&self) -> MorphMany<Video, Image> {
        self.morph_many::<Image>("imageable")
    }

    fn tags(&self) -> MorphToMany<Video, Tag> {
        self.morph_to_many::<Tag>("taggable")
    }
}

pub trait TagRelations {
    fn posts(&self) -> MorphedByMany<Tag, Post>;
    fn videos(&self) -> MorphedByMany<Tag, Video>;
}

impl TagRelations for Entity<Tag> {
    fn posts(&self) -> MorphedByMany<Tag, Post> {
        self.morphed_by_many::<Post>("taggable")
    }

    fn videos(&self) -> MorphedByMany<Tag, Video> {
        self.morphed_by_many::<Video>("taggable")
    }
}

pub trait CountryRelations {
    fn posts(&self) -> HasManyThrough<Country, Post>;
}

impl CountryRelations for Entity<Country> {
    fn posts(&self) -> HasManyThrough<Country, Post> {
        self.has_many_through::<Post, User>()
    }
}

impl Model for User {
    fn type_name() -> &'static str {
        "User"
    }

    fn collection_name() -> &'static str {
        "users"
    }

    fn uses_soft_deletes() -> bool {
        true
    }

    fn hidden() -> &'static [&'static str] {
        &["password"]
    }

    fn relations(relations: &mut RelationRegistry<Self>) {
        relations
            .define("profile", |user| user.profile())
            .define("posts", |user| user.posts())
            .define("roles", |user| user.roles());
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

    fn uses_timestamps() -> bool {
        true
    }

    fn relations(relations: &mut RelationRegistry<Self>) {
        relations
            .define("author", |post| post.author())
            .define("comments", |post| post.comments())
            .define("image", |post| post.image())
            .define("tags", |post| post.tags());
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
        relations.define("posts", |country| country.posts());
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

impl Model for Video {
    fn type_name() -> &'static str {
        "Video"
    }

    fn collection_name() -> &'static str {
        "videos"
    }

    fn relations(relations: &mut RelationRegistry<Self>) {
        relations
            .define("images", |video| video.images())
            .define("tags", |video| video.tags());
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
        relations
            .define("posts", |tag| tag.posts())
            .define("videos", |tag| tag.videos());
    }
}

pub fn database() -> MemoryDatabase {
    MemoryDatabase::new("elif_odm_test")
}

pub fn id_of<M: Model>(entity: &Entity<M>) -> DocumentId {
    entity.id().expect("entity was saved")
}

/// Sorted canonical ids, for order-independent comparisons
pub fn ids<M: Model>(entities: &[Entity<M>]) -> Vec<String> {
    let mut ids: Vec<String> = entities.iter().map(|e| id_of(e).to_canonical()).collect();
    ids.sort();
    ids
}

/// Two posts by one author: post A with comments liked 5 and 10, post B with
/// one comment liked 1
pub struct Blog {
    pub country: Entity<Country>,
    pub author: Entity<User>,
    pub post_a: Entity<Post>,
    pub post_b: Entity<Post>,
}

pub async fn seed_blog(db: &MemoryDatabase) -> Blog {
    let country = Country::create(db, json!({ "name": "Norway" })).await.unwrap();
    let author = User::create(
        db,
        json!({
            "name": "Ann",
            "email": "ann@example.com",
            "password": "secret",
            "countryId": id_of(&country).to_value(),
        }),
    )
    .await
    .unwrap();

    let post_a = author
        .posts()
        .create(db, json!({ "title": "A", "content": "first" }))
        .await
        .unwrap();
    let post_b = author
        .posts()
        .create(db, json!({ "title": "B", "content": "second" }))
        .await
        .unwrap();

    post_a
        .comments()
        .create_many(
            db,
            vec![
                json!({ "content": "nice", "active": true, "likes": 5 }),
                json!({ "content": "great", "active": true, "likes": 10 }),
            ],
        )
        .await
        .unwrap();
    post_b
        .comments()
        .create(db, json!({ "content": "meh", "active": false, "likes": 1 }))
        .await
        .unwrap();

    Blog {
        country,
        author,
        post_a,
        post_b,
    }
}

pub async fn seed_roles(db: &MemoryDatabase, names: &[&str]) -> Vec<Entity<Role>> {
    let items = names.iter().map(|name| json!({ "name": name })).collect();
    Role::insert_many(db, items).await.unwrap()
}
