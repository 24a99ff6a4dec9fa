//! Field descriptors.

use crate::value::Kind;
use heck::ToSnakeCase;

/// Storage family of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Boolean,
    Integer,
    Float,
    /// Bounded string (`varchar`)
    Char,
    Text,
    Date,
    DateTime,
    /// Foreign key held on this model's table
    Many2One,
    /// Foreign key held on this model's table, unique on the target
    One2One,
    /// Reverse of a `Many2One` on the target model
    One2Many,
    /// Reverse of a `One2One` on the target model
    Rev2One,
    /// Relation through a link table
    Many2Many,
}

impl FieldType {
    pub fn is_relation(self) -> bool {
        self.is_fk() || self.is_reverse_fk() || self.is_m2m()
    }

    /// Relation whose foreign key column lives on this model's table.
    pub fn is_fk(self) -> bool {
        matches!(self, FieldType::Many2One | FieldType::One2One)
    }

    /// Relation whose foreign key column lives on the target model's table.
    pub fn is_reverse_fk(self) -> bool {
        matches!(self, FieldType::One2Many | FieldType::Rev2One)
    }

    pub fn is_m2m(self) -> bool {
        matches!(self, FieldType::Many2Many)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, FieldType::Integer | FieldType::Float)
    }

    /// Kind of the values this field stores.
    pub fn kind(self) -> Kind {
        match self {
            FieldType::Boolean => Kind::Boolean,
            FieldType::Integer => Kind::Integer,
            FieldType::Float => Kind::Float,
            FieldType::Char | FieldType::Text => Kind::Text,
            FieldType::Date => Kind::Date,
            FieldType::DateTime => Kind::DateTime,
            FieldType::Many2One | FieldType::One2One | FieldType::Rev2One => Kind::Relation,
            FieldType::One2Many | FieldType::Many2Many => Kind::RelationList,
        }
    }
}

/// Aggregate applied to a field in grouped selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Aggregate {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    BoolAnd,
    BoolOr,
}

impl Aggregate {
    /// SQL function name.
    pub fn function(self) -> &'static str {
        match self {
            Aggregate::Sum => "sum",
            Aggregate::Avg => "avg",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
            Aggregate::Count => "count",
            Aggregate::BoolAnd => "bool_and",
            Aggregate::BoolOr => "bool_or",
        }
    }
}

/// Link table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    pub table: String,
    /// Column pointing at the owning model's id
    pub our_fk: String,
    /// Column pointing at the target model's id
    pub their_fk: String,
}

impl LinkTable {
    pub fn new(
        table: impl Into<String>,
        our_fk: impl Into<String>,
        their_fk: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            our_fk: our_fk.into(),
            their_fk: their_fk.into(),
        }
    }
}

/// Metadata of one field of a model.
///
/// `name` is the identifier used in code (`Manager`), `json` is the column or
/// payload key (`manager_id`). Both are accepted when resolving paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub json: String,
    pub field_type: FieldType,
    /// Target model of a relation field
    pub relation: Option<String>,
    /// For `One2Many`/`Rev2One`: column on the target holding our id
    pub reverse_fk: Option<String>,
    /// For `Many2Many`
    pub link: Option<LinkTable>,
    /// Dotted path this field delegates to (`Manager.Name`)
    pub related_path: Option<String>,
    pub required: bool,
    pub aggregate: Option<Aggregate>,
    /// Maximum length for `Char` fields
    pub size: Option<u32>,
}

impl FieldDescriptor {
    /// A scalar field. The json name is the snake case of `name`.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let json = name.to_snake_case();
        Self {
            name,
            json,
            field_type,
            relation: None,
            reverse_fk: None,
            link: None,
            related_path: None,
            required: false,
            aggregate: None,
            size: None,
        }
    }

    /// A `Many2One` to `target`, stored in column `<snake name>_id`.
    pub fn many2one(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut field = Self::new(name, FieldType::Many2One);
        field.json = format!("{}_id", field.json);
        field.relation = Some(target.into());
        field
    }

    /// A `One2One` to `target`, stored in column `<snake name>_id`.
    pub fn one2one(name: impl Into<String>, target: impl Into<String>) -> Self {
        let mut field = Self::many2one(name, target);
        field.field_type = FieldType::One2One;
        field
    }

    /// A `One2Many` whose inverse is the `reverse_fk` column of `target`.
    pub fn one2many(
        name: impl Into<String>,
        target: impl Into<String>,
        reverse_fk: impl Into<String>,
    ) -> Self {
        let mut field = Self::new(name, FieldType::One2Many);
        field.json = format!("{}_ids", field.json);
        field.relation = Some(target.into());
        field.reverse_fk = Some(reverse_fk.into());
        field
    }

    /// A `Rev2One` whose inverse is the `reverse_fk` column of `target`.
    pub fn rev2one(
        name: impl Into<String>,
        target: impl Into<String>,
        reverse_fk: impl Into<String>,
    ) -> Self {
        let mut field = Self::new(name, FieldType::Rev2One);
        field.json = format!("{}_id", field.json);
        field.relation = Some(target.into());
        field.reverse_fk = Some(reverse_fk.into());
        field
    }

    pub fn many2many(name: impl Into<String>, target: impl Into<String>, link: LinkTable) -> Self {
        let mut field = Self::new(name, FieldType::Many2Many);
        field.json = format!("{}_ids", field.json);
        field.relation = Some(target.into());
        field.link = Some(link);
        field
    }

    pub fn with_json(mut self, json: impl Into<String>) -> Self {
        self.json = json.into();
        self
    }

    /// Make this field delegate to `path`. Related fields have no column.
    pub fn related(mut self, path: impl Into<String>) -> Self {
        self.related_path = Some(path.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_aggregate(mut self, aggregate: Aggregate) -> Self {
        self.aggregate = Some(aggregate);
        self
    }

    pub fn with_size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Whether the field is stored as a column on its model's table.
    pub fn is_column(&self) -> bool {
        self.related_path.is_none() && !self.field_type.is_reverse_fk() && !self.field_type.is_m2m()
    }

    /// Aggregate used in grouped selects: the configured one, else `sum`
    /// for numeric fields.
    pub fn effective_aggregate(&self) -> Option<Aggregate> {
        self.aggregate
            .or_else(|| self.field_type.is_numeric().then_some(Aggregate::Sum))
    }

    pub(crate) fn id_field() -> Self {
        Self::new("ID", FieldType::Integer).with_json("id").required()
    }
}
