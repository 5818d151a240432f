#![allow(dead_code)]

use search_index_sync::model::{EntityRef, TypeLabel};
use search_index_sync::registry::DocumentMapping;

pub fn article_type() -> TypeLabel {
    TypeLabel::new("blog", "Article")
}

pub fn tag_type() -> TypeLabel {
    TypeLabel::new("blog", "Tag")
}

pub fn author_type() -> TypeLabel {
    TypeLabel::new("blog", "Author")
}

/// Stored by the tests but never indexed.
pub fn comment_type() -> TypeLabel {
    TypeLabel::new("blog", "Comment")
}

pub fn article_ref(pk: i64) -> EntityRef {
    EntityRef::new(article_type(), pk)
}

pub fn tag_ref(pk: &str) -> EntityRef {
    EntityRef::new(tag_type(), pk)
}

pub fn author_ref(pk: i64) -> EntityRef {
    EntityRef::new(author_type(), pk)
}

/// Articles embed their tags, authors embed their articles.
pub fn blog_mappings() -> Vec<DocumentMapping> {
    vec![
        DocumentMapping::new(article_type(), &["title", "body"])
            .embed("tags", tag_type(), &["name"]),
        DocumentMapping::new(author_type(), &["name"]).embed(
            "articles",
            article_type(),
            &["title"],
        ),
    ]
}
