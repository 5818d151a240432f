#![allow(dead_code)]

pub const ARTICLE_42: i64 = 42;
pub const ARTICLE_43: i64 = 43;

pub const AUTHOR_ADA: i64 = 1;

pub const TAG_RUST: &str = "rust";
pub const TAG_SQL: &str = "sql";
