//! Metadata catalog types
//!
//! These shapes mirror the `/Metadata` sub-API wire format (PascalCase JSON)
//! and double as the typed rows stored in the metadata cache.

use serde::Deserialize;
use serde::Serialize;

/// D365 F&O entity categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityCategory {
    /// Master data (customers, vendors, products).
    Master,
    /// Configuration data.
    Configuration,
    /// Transactional data.
    Transaction,
    /// Reference data.
    Reference,
    /// Document data.
    Document,
    /// Parameter data.
    Parameters,
}

impl EntityCategory {
    /// Returns the wire/storage name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "Master",
            Self::Configuration => "Configuration",
            Self::Transaction => "Transaction",
            Self::Reference => "Reference",
            Self::Document => "Document",
            Self::Parameters => "Parameters",
        }
    }

    /// Parses a category from its wire/storage name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Master" => Some(Self::Master),
            "Configuration" => Some(Self::Configuration),
            "Transaction" => Some(Self::Transaction),
            "Reference" => Some(Self::Reference),
            "Document" => Some(Self::Document),
            "Parameters" => Some(Self::Parameters),
            _ => None,
        }
    }
}

/// D365 X++ data types as exposed through OData metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XppType {
    /// Text.
    String,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// Floating point / decimal.
    Real,
    /// GUID.
    Guid,
    /// Calendar date.
    Date,
    /// Time of day.
    Time,
    /// UTC date-time.
    UtcDateTime,
    /// Enumeration member.
    Enum,
    /// X++ container (not representable in URL keys).
    Container,
    /// X++ record (not representable in URL keys).
    Record,
    /// Void (not representable in URL keys).
    Void,
}

impl XppType {
    /// Returns the wire/storage name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "String",
            Self::Int32 => "Int32",
            Self::Int64 => "Int64",
            Self::Real => "Real",
            Self::Guid => "Guid",
            Self::Date => "Date",
            Self::Time => "Time",
            Self::UtcDateTime => "UtcDateTime",
            Self::Enum => "Enum",
            Self::Container => "Container",
            Self::Record => "Record",
            Self::Void => "Void",
        }
    }

    /// Parses a type from its wire/storage name.
    ///
    /// Unknown names fall back to `String`, matching how the server encodes
    /// extended string types.
    pub fn parse(s: &str) -> Self {
        match s {
            "Int32" => Self::Int32,
            "Int64" => Self::Int64,
            "Real" => Self::Real,
            "Guid" => Self::Guid,
            "Date" => Self::Date,
            "Time" => Self::Time,
            "UtcDateTime" => Self::UtcDateTime,
            "Enum" => Self::Enum,
            "Container" => Self::Container,
            "Record" => Self::Record,
            "Void" => Self::Void,
            _ => Self::String,
        }
    }
}

/// Action binding kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BindingKind {
    /// Callable without any entity context.
    Unbound,
    /// Bound to an entity set.
    BoundToEntitySet,
    /// Bound to a single entity instance.
    BoundToEntityInstance,
}

impl BindingKind {
    /// Returns the wire/storage name of the binding kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "Unbound",
            Self::BoundToEntitySet => "BoundToEntitySet",
            Self::BoundToEntityInstance => "BoundToEntityInstance",
        }
    }

    /// Parses a binding kind; unknown names fall back to `Unbound`.
    pub fn parse(s: &str) -> Self {
        match s {
            "BoundToEntitySet" => Self::BoundToEntitySet,
            "BoundToEntityInstance" => Self::BoundToEntityInstance,
            _ => Self::Unbound,
        }
    }
}

/// Navigation property cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cardinality {
    /// Single related record.
    Single,
    /// Collection of related records.
    Multiple,
}

impl Cardinality {
    /// Returns the wire/storage name of the cardinality.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "Single",
            Self::Multiple => "Multiple",
        }
    }

    /// Parses a cardinality; unknown names fall back to `Single`.
    pub fn parse(s: &str) -> Self {
        match s {
            "Multiple" => Self::Multiple,
            _ => Self::Single,
        }
    }
}

/// A catalog entry from the `DataEntities` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DataEntityInfo {
    /// Internal entity name.
    pub name: String,

    /// Name of the corresponding public entity, if exposed.
    #[serde(default)]
    pub public_entity_name: String,

    /// OData entity-set name used in `/data` URLs.
    #[serde(default)]
    pub public_collection_name: String,

    /// Label token (e.g. `@SYS13342`).
    #[serde(default)]
    pub label_id: Option<String>,

    /// Resolved label text, populated by label resolution.
    #[serde(skip)]
    pub label_text: Option<String>,

    /// Whether the entity is exposed through the OData data service.
    #[serde(default)]
    pub data_service_enabled: bool,

    /// Whether the entity participates in data management.
    #[serde(default)]
    pub data_management_enabled: bool,

    /// Entity category.
    #[serde(default)]
    pub entity_category: Option<EntityCategory>,

    /// Whether writes are rejected by the server.
    #[serde(default)]
    pub is_read_only: bool,
}

/// A property of a public entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PropertyInfo {
    /// Property name.
    pub name: String,

    /// OData type name (e.g. `Edm.String`, `Microsoft.Dynamics.DataEntities.NoYes`).
    #[serde(default)]
    pub type_name: String,

    /// D365 X++ data type.
    #[serde(default = "default_string_type")]
    pub data_type: String,

    /// Label token.
    #[serde(default)]
    pub label_id: Option<String>,

    /// Resolved label text, populated by label resolution.
    #[serde(skip)]
    pub label_text: Option<String>,

    /// Whether this property is part of the entity key.
    #[serde(default)]
    pub is_key: bool,

    /// Whether a value is required on create.
    #[serde(default)]
    pub is_mandatory: bool,

    /// Whether the property is enabled by configuration keys.
    #[serde(default = "default_true")]
    pub configuration_enabled: bool,

    /// Whether the property can be edited.
    #[serde(default = "default_true")]
    pub allow_edit: bool,

    /// Whether the property can be set on create.
    #[serde(default = "default_true")]
    pub allow_edit_on_create: bool,

    /// Whether the property is a financial dimension.
    #[serde(default)]
    pub is_dimension: bool,

    /// Dimension relation, when `is_dimension` is set.
    #[serde(default)]
    pub dimension_relation: Option<String>,

    /// Position within the entity's ordered property list.
    #[serde(default)]
    pub property_order: i32,
}

impl PropertyInfo {
    /// Returns the parsed X++ type of this property.
    pub fn xpp_type(&self) -> XppType {
        XppType::parse(&self.data_type)
    }
}

fn default_string_type() -> String {
    "String".to_string()
}

fn default_true() -> bool {
    true
}

/// A relation constraint on a navigation property.
///
/// Closed set of constraint kinds, discriminated on the wire by `@odata.type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "@odata.type")]
pub enum RelationConstraint {
    /// Foreign-key relationship between two properties.
    #[serde(rename = "#Microsoft.Dynamics.Metadata.ReferentialConstraintMetadata")]
    Referential {
        /// Property on this entity.
        #[serde(rename = "Property")]
        property: String,
        /// Property on the related entity.
        #[serde(rename = "ReferencedProperty")]
        referenced_property: String,
    },

    /// Fixed value on a property of this entity.
    #[serde(rename = "#Microsoft.Dynamics.Metadata.FixedConstraintMetadata")]
    Fixed {
        /// Constrained property.
        #[serde(rename = "Property")]
        property: String,
        /// Fixed integer value.
        #[serde(rename = "Value", default)]
        value: Option<i64>,
        /// Fixed string value.
        #[serde(rename = "ValueStr", default)]
        value_str: Option<String>,
    },

    /// Fixed value on a property of the related entity.
    #[serde(rename = "#Microsoft.Dynamics.Metadata.RelatedFixedConstraintMetadata")]
    RelatedFixed {
        /// Constrained property on the related entity.
        #[serde(rename = "RelatedProperty")]
        related_property: String,
        /// Fixed integer value.
        #[serde(rename = "Value", default)]
        value: Option<i64>,
        /// Fixed string value.
        #[serde(rename = "ValueStr", default)]
        value_str: Option<String>,
    },
}

impl RelationConstraint {
    /// Returns the storage discriminator for this constraint.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Referential { .. } => "Referential",
            Self::Fixed { .. } => "Fixed",
            Self::RelatedFixed { .. } => "RelatedFixed",
        }
    }
}

/// A navigation property of a public entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NavigationPropertyInfo {
    /// Navigation property name.
    pub name: String,

    /// Name of the related entity.
    #[serde(default)]
    pub related_entity: String,

    /// Cardinality of the relationship.
    #[serde(default = "default_cardinality")]
    pub cardinality: String,

    /// Relation constraints.
    #[serde(default)]
    pub constraints: Vec<RelationConstraint>,
}

impl NavigationPropertyInfo {
    /// Returns the parsed cardinality of this navigation property.
    pub fn parsed_cardinality(&self) -> Cardinality {
        Cardinality::parse(&self.cardinality)
    }
}

fn default_cardinality() -> String {
    "Single".to_string()
}

/// A named group of properties on a public entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PropertyGroupInfo {
    /// Group name.
    pub name: String,

    /// Member property names, in group order.
    #[serde(default)]
    pub properties: Vec<String>,
}

/// Type information for action parameters and return values.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionTypeInfo {
    /// OData type name.
    #[serde(default)]
    pub type_name: String,

    /// Whether this is a collection type.
    #[serde(default)]
    pub is_collection: bool,

    /// D365 X++ type, when known.
    #[serde(default)]
    pub odata_xpp_type: Option<String>,
}

/// A parameter of an OData action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionParameterInfo {
    /// Parameter name.
    pub name: String,

    /// Parameter type.
    #[serde(rename = "Type")]
    pub parameter_type: ActionTypeInfo,

    /// Position within the action's parameter list.
    #[serde(default)]
    pub parameter_order: i32,
}

/// An OData action exposed by a public entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActionInfo {
    /// Action name.
    pub name: String,

    /// How the action is bound.
    #[serde(default = "default_binding_kind")]
    pub binding_kind: String,

    /// Owning entity name, for bound actions.
    #[serde(default)]
    pub entity_name: Option<String>,

    /// Parameters, in declaration order.
    #[serde(default)]
    pub parameters: Vec<ActionParameterInfo>,

    /// Return type, absent for void actions.
    #[serde(default)]
    pub return_type: Option<ActionTypeInfo>,

    /// Field lookup hint, when the action drives a lookup.
    #[serde(default)]
    pub field_lookup: Option<String>,
}

impl ActionInfo {
    /// Returns the parsed binding kind of this action.
    pub fn parsed_binding_kind(&self) -> BindingKind {
        BindingKind::parse(&self.binding_kind)
    }
}

fn default_binding_kind() -> String {
    "Unbound".to_string()
}

/// Full schema of a public entity from the `PublicEntities` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PublicEntityInfo {
    /// Entity name.
    pub name: String,

    /// OData entity-set name.
    #[serde(default)]
    pub entity_set_name: String,

    /// Label token.
    #[serde(default)]
    pub label_id: Option<String>,

    /// Resolved label text, populated by label resolution.
    #[serde(skip)]
    pub label_text: Option<String>,

    /// Whether writes are rejected by the server.
    #[serde(default)]
    pub is_read_only: bool,

    /// Whether the entity is enabled by configuration keys.
    #[serde(default = "default_true")]
    pub configuration_enabled: bool,

    /// Properties, ordered by `property_order`.
    #[serde(default)]
    pub properties: Vec<PropertyInfo>,

    /// Navigation properties.
    #[serde(default)]
    pub navigation_properties: Vec<NavigationPropertyInfo>,

    /// Property groups.
    #[serde(default)]
    pub property_groups: Vec<PropertyGroupInfo>,

    /// Actions bound to the entity.
    #[serde(default)]
    pub actions: Vec<ActionInfo>,
}

impl PublicEntityInfo {
    /// Returns the key properties in `property_order`.
    ///
    /// The returned order is the order composite keys serialize in.
    pub fn key_properties(&self) -> Vec<&PropertyInfo> {
        let mut keys: Vec<&PropertyInfo> = self.properties.iter().filter(|p| p.is_key).collect();
        keys.sort_by_key(|p| p.property_order);
        keys
    }
}

/// A member of a public enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumerationMemberInfo {
    /// Member name.
    pub name: String,

    /// Numeric value.
    #[serde(default)]
    pub value: i32,

    /// Label token.
    #[serde(default)]
    pub label_id: Option<String>,

    /// Resolved label text, populated by label resolution.
    #[serde(skip)]
    pub label_text: Option<String>,

    /// Whether the member is enabled by configuration keys.
    #[serde(default = "default_true")]
    pub configuration_enabled: bool,

    /// Position within the enumeration.
    #[serde(default)]
    pub member_order: i32,
}

/// A public enumeration from the `PublicEnumerations` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EnumerationInfo {
    /// Enumeration name.
    pub name: String,

    /// Label token.
    #[serde(default)]
    pub label_id: Option<String>,

    /// Resolved label text, populated by label resolution.
    #[serde(skip)]
    pub label_text: Option<String>,

    /// Members, in `member_order`.
    #[serde(default)]
    pub members: Vec<EnumerationMemberInfo>,
}

/// A page of records from a collection query.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityCollection {
    /// The records.
    #[serde(default)]
    pub value: Vec<serde_json::Value>,

    /// Total count, present when `$count=true` was requested.
    #[serde(rename = "@odata.count", default)]
    pub odata_count: Option<i64>,

    /// Continuation link for server-side paging.
    #[serde(rename = "@odata.nextLink", default)]
    pub odata_next_link: Option<String>,
}
