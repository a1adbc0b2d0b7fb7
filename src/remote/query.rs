//! Typed query builder for the tracking server's expression language.
//!
//! Callers never concatenate expression strings: fields are a closed enum
//! and every value is quoted and escaped during rendering.

use super::client::VERSION_FIELDS;
use super::types::{EntityType, VersionSearch};
use crate::config::DEFAULT_PAGE_LIMIT;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Name,
    Description,
    Color,
    ProjectId,
    CreatedAt,
    CategoryName,
    AssetName,
    VersionNumber,
    ThumbnailId,
    StatusId,
    StatusName,
    InList,
    InReviewSession,
    SchemaId,
    WorkflowObjectType,
    Username,
    ProjectSchemaId,
}

impl Field {
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::Name => "name",
            Field::Description => "description",
            Field::Color => "color",
            Field::ProjectId => "project_id",
            Field::CreatedAt => "created_at",
            Field::CategoryName => "category.name",
            Field::AssetName => "asset.name",
            Field::VersionNumber => "version",
            Field::ThumbnailId => "thumbnail_id",
            Field::StatusId => "status_id",
            Field::StatusName => "status.name",
            Field::InList => "lists.id",
            Field::InReviewSession => "review_session_objects.review_session_id",
            Field::SchemaId => "project_schemas.id",
            Field::WorkflowObjectType => "workflow_schemas.object_type",
            Field::Username => "username",
            Field::ProjectSchemaId => "project_schema_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Int(i64),
    Bool(bool),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl Value {
    fn render(&self, out: &mut String) {
        match self {
            Value::Text(text) => {
                out.push('"');
                for ch in text.chars() {
                    match ch {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        _ => out.push(ch),
                    }
                }
                out.push('"');
            }
            Value::Int(n) => {
                let _ = write!(out, "{}", n);
            }
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(Field, Value),
    NotEq(Field, Value),
    In(Field, Vec<Value>),
    Like(Field, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: Field, value: impl Into<Value>) -> Self {
        Filter::Eq(field, value.into())
    }

    pub fn not_eq(field: Field, value: impl Into<Value>) -> Self {
        Filter::NotEq(field, value.into())
    }

    pub fn in_<I, V>(field: Field, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Filter::In(field, values.into_iter().map(Into::into).collect())
    }

    /// Case-insensitive substring match.
    pub fn contains(field: Field, needle: impl Into<String>) -> Self {
        Filter::Like(field, needle.into())
    }

    fn render(&self, out: &mut String) {
        match self {
            Filter::Eq(field, value) => {
                out.push_str(field.as_str());
                out.push_str(" is ");
                value.render(out);
            }
            Filter::NotEq(field, value) => {
                out.push_str(field.as_str());
                out.push_str(" is_not ");
                value.render(out);
            }
            Filter::In(field, values) => {
                out.push_str(field.as_str());
                out.push_str(" in (");
                for (idx, value) in values.iter().enumerate() {
                    if idx > 0 {
                        out.push_str(", ");
                    }
                    value.render(out);
                }
                out.push(')');
            }
            Filter::Like(field, needle) => {
                out.push_str(field.as_str());
                out.push_str(" like ");
                let escaped = needle.replace('%', "\\%");
                Value::Text(format!("%{}%", escaped)).render(out);
            }
            Filter::And(parts) => Self::render_group(parts, " and ", out),
            Filter::Or(parts) => Self::render_group(parts, " or ", out),
        }
    }

    fn render_group(parts: &[Filter], joiner: &str, out: &mut String) {
        out.push('(');
        for (idx, part) in parts.iter().enumerate() {
            if idx > 0 {
                out.push_str(joiner);
            }
            part.render(out);
        }
        out.push(')');
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    entity: EntityType,
    fields: Vec<Field>,
    filters: Vec<Filter>,
    order_by: Option<(Field, Order)>,
    limit: Option<u32>,
    offset: Option<u32>,
}

impl Query {
    pub fn select(entity: EntityType) -> Self {
        Self {
            entity,
            fields: Vec::new(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            offset: None,
        }
    }

    pub fn fields<I: IntoIterator<Item = Field>>(mut self, fields: I) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        // An empty IN matches nothing on the server; drop it instead.
        if let Filter::In(_, values) = &filter {
            if values.is_empty() {
                return self;
            }
        }
        self.filters.push(filter);
        self
    }

    pub fn filter_opt(self, filter: Option<Filter>) -> Self {
        match filter {
            Some(f) => self.filter(f),
            None => self,
        }
    }

    pub fn order_by(mut self, field: Field, order: Order) -> Self {
        self.order_by = Some((field, order));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn render(&self) -> String {
        let mut out = String::from("select ");
        if self.fields.is_empty() {
            out.push_str(Field::Id.as_str());
        } else {
            let names: Vec<&str> = self.fields.iter().map(Field::as_str).collect();
            out.push_str(&names.join(", "));
        }
        out.push_str(" from ");
        out.push_str(self.entity.as_str());

        if !self.filters.is_empty() {
            out.push_str(" where ");
            for (idx, filter) in self.filters.iter().enumerate() {
                if idx > 0 {
                    out.push_str(" and ");
                }
                filter.render(&mut out);
            }
        }

        if let Some((field, order)) = self.order_by {
            out.push_str(" order by ");
            out.push_str(field.as_str());
            out.push_str(match order {
                Order::Ascending => " ascending",
                Order::Descending => " descending",
            });
        }
        if let Some(offset) = self.offset {
            let _ = write!(out, " offset {}", offset);
        }
        if let Some(limit) = self.limit {
            let _ = write!(out, " limit {}", limit);
        }
        out
    }
}

impl VersionSearch {
    pub fn to_query(&self) -> Query {
        Query::select(EntityType::AssetVersion)
            .fields(VERSION_FIELDS)
            .filter_opt(
                self.project_id
                    .as_ref()
                    .map(|p| Filter::eq(Field::ProjectId, p)),
            )
            .filter_opt(
                self.name_contains
                    .as_ref()
                    .filter(|n| !n.trim().is_empty())
                    .map(|n| Filter::contains(Field::AssetName, n.trim())),
            )
            .filter(Filter::in_(Field::StatusName, &self.status_names))
            .order_by(Field::VersionNumber, Order::Descending)
            .offset(self.offset.unwrap_or(0))
            .limit(self.limit.unwrap_or(DEFAULT_PAGE_LIMIT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_full_query() {
        let q = Query::select(EntityType::AssetVersion)
            .fields([Field::Id, Field::AssetName, Field::VersionNumber])
            .filter(Filter::eq(Field::ProjectId, "p-1"))
            .filter(Filter::in_(Field::StatusName, ["Approved", "Pending Review"]))
            .order_by(Field::VersionNumber, Order::Descending)
            .offset(20)
            .limit(10);

        assert_eq!(
            q.render(),
            "select id, asset.name, version from AssetVersion \
             where project_id is \"p-1\" and status.name in (\"Approved\", \"Pending Review\") \
             order by version descending offset 20 limit 10"
        );
    }

    #[test]
    fn test_values_are_escaped() {
        let q = Query::select(EntityType::AssetVersion)
            .filter(Filter::eq(Field::Name, "x\" or id is \"1"));

        assert_eq!(
            q.render(),
            "select id from AssetVersion where name is \"x\\\" or id is \\\"1\""
        );
    }

    #[test]
    fn test_empty_in_is_dropped() {
        let q = Query::select(EntityType::Status)
            .filter(Filter::in_(Field::Name, Vec::<String>::new()));
        assert_eq!(q.render(), "select id from Status");
    }

    #[test]
    fn test_version_search_defaults_paging() {
        let search = VersionSearch {
            project_id: Some("p-1".to_string()),
            name_contains: Some("  ".to_string()),
            ..Default::default()
        };
        let rendered = search.to_query().render();

        assert!(rendered.starts_with("select id, asset.name, version, thumbnail_id"));
        assert!(rendered.contains("where project_id is \"p-1\" order by"));
        assert!(rendered.ends_with("offset 0 limit 100"));
    }

    #[test]
    fn test_groups_and_like() {
        let q = Query::select(EntityType::AssetVersion).filter(Filter::Or(vec![
            Filter::contains(Field::AssetName, "sh010"),
            Filter::eq(Field::VersionNumber, 3i64),
        ]));
        assert_eq!(
            q.render(),
            "select id from AssetVersion where (asset.name like \"%sh010%\" or version is 3)"
        );
    }
}
