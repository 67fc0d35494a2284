//! Entity types and the static catalog of asset-bearing fields.
//!
//! Which fields of a record hold asset references is declared here, per
//! entity type, and nowhere else. Fields that are not listed are never read
//! by the reference scan, so adding a column to a content type cannot
//! silently change what reconciliation keeps or deletes.

use crate::asset::Namespace;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Content types managed through the admin surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Gallery,
    TeamMember,
    Award,
    Project,
    Attraction,
    AssociateCompany,
    Shareholder,
    Document,
    Popup,
    SiteSettings,
}

/// How many references a field holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldShape {
    /// A single string value.
    Single,
    /// An array of objects, each holding one reference under `item_key`.
    List { item_key: &'static str },
}

/// Which namespace uploads into a field are stored in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceRule {
    Fixed(&'static str),
    /// Chosen per upload (document download categories).
    Dynamic,
}

impl NamespaceRule {
    /// Resolve the namespace for an upload, honouring a caller-supplied
    /// namespace only where the field allows it.
    pub fn resolve(&self, requested: Option<&Namespace>) -> crate::Result<Namespace> {
        match (self, requested) {
            (Self::Fixed(fixed), None) => Namespace::new(*fixed),
            (Self::Fixed(fixed), Some(requested)) if requested.as_str() == *fixed => {
                Ok(requested.clone())
            }
            (Self::Fixed(fixed), Some(requested)) => Err(crate::Error::NamespaceMismatch {
                requested: requested.to_string(),
                expected: (*fixed).to_string(),
            }),
            (Self::Dynamic, Some(requested)) => Ok(requested.clone()),
            (Self::Dynamic, None) => Err(crate::Error::InvalidNamespace(
                "field requires an explicit namespace".to_string(),
            )),
        }
    }

    /// Whether references stored under this rule may live in `namespace`.
    pub fn may_store_in(&self, namespace: &Namespace) -> bool {
        match self {
            Self::Fixed(fixed) => namespace.as_str() == *fixed,
            Self::Dynamic => true,
        }
    }
}

/// One asset-bearing field of an entity type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AssetField {
    /// Dot-separated path into the record's fields (`home_about.image_1`).
    pub path: &'static str,
    pub shape: FieldShape,
    pub namespace: NamespaceRule,
}

impl AssetField {
    const fn single(path: &'static str, namespace: &'static str) -> Self {
        Self {
            path,
            shape: FieldShape::Single,
            namespace: NamespaceRule::Fixed(namespace),
        }
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> impl Iterator<Item = &'static str> {
        self.path.split('.')
    }
}

const GALLERY_FIELDS: &[AssetField] = &[AssetField::single("image_url", "gallery")];
const TEAM_MEMBER_FIELDS: &[AssetField] = &[AssetField::single("image_url", "team-photos")];
const AWARD_FIELDS: &[AssetField] = &[AssetField::single("image_url", "awards")];
const PROJECT_FIELDS: &[AssetField] = &[AssetField::single("image_url", "projects")];
const ATTRACTION_FIELDS: &[AssetField] = &[AssetField::single("image_url", "attractions")];
const ASSOCIATE_COMPANY_FIELDS: &[AssetField] = &[AssetField::single("logo_url", "logos")];
const SHAREHOLDER_FIELDS: &[AssetField] = &[AssetField::single("logo_url", "logos")];
const DOCUMENT_FIELDS: &[AssetField] = &[AssetField {
    path: "file_url",
    shape: FieldShape::Single,
    namespace: NamespaceRule::Dynamic,
}];
const POPUP_FIELDS: &[AssetField] = &[AssetField::single("image_url", "popups")];
const SITE_SETTINGS_FIELDS: &[AssetField] = &[
    AssetField::single("logo_url", "logos"),
    AssetField::single("about_image_url", "about"),
    AssetField::single("progress_hero_image", "progress"),
    AssetField::single("home_about.image_1", "home"),
    AssetField::single("home_about.image_2", "home"),
    AssetField {
        path: "hero_slides",
        shape: FieldShape::List { item_key: "image" },
        namespace: NamespaceRule::Fixed("banners"),
    },
];

impl EntityType {
    /// Every entity type, in catalog order.
    pub const ALL: [EntityType; 10] = [
        Self::Gallery,
        Self::TeamMember,
        Self::Award,
        Self::Project,
        Self::Attraction,
        Self::AssociateCompany,
        Self::Shareholder,
        Self::Document,
        Self::Popup,
        Self::SiteSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gallery => "gallery",
            Self::TeamMember => "team_member",
            Self::Award => "award",
            Self::Project => "project",
            Self::Attraction => "attraction",
            Self::AssociateCompany => "associate_company",
            Self::Shareholder => "shareholder",
            Self::Document => "document",
            Self::Popup => "popup",
            Self::SiteSettings => "site_settings",
        }
    }

    /// Backing table name.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Gallery => "gallery",
            Self::TeamMember => "team_members",
            Self::Award => "awards_recognitions",
            Self::Project => "projects",
            Self::Attraction => "bandipur_attractions",
            Self::AssociateCompany => "associate_companies",
            Self::Shareholder => "shareholders",
            Self::Document => "documents",
            Self::Popup => "popups",
            Self::SiteSettings => "site_settings",
        }
    }

    /// Asset-bearing fields of this type.
    pub fn asset_fields(&self) -> &'static [AssetField] {
        match self {
            Self::Gallery => GALLERY_FIELDS,
            Self::TeamMember => TEAM_MEMBER_FIELDS,
            Self::Award => AWARD_FIELDS,
            Self::Project => PROJECT_FIELDS,
            Self::Attraction => ATTRACTION_FIELDS,
            Self::AssociateCompany => ASSOCIATE_COMPANY_FIELDS,
            Self::Shareholder => SHAREHOLDER_FIELDS,
            Self::Document => DOCUMENT_FIELDS,
            Self::Popup => POPUP_FIELDS,
            Self::SiteSettings => SITE_SETTINGS_FIELDS,
        }
    }

    /// Look up an asset field by path.
    pub fn asset_field(&self, path: &str) -> crate::Result<&'static AssetField> {
        self.asset_fields()
            .iter()
            .find(|f| f.path == path)
            .ok_or_else(|| crate::Error::UnknownAssetField {
                entity: self.as_str().to_string(),
                field: path.to_string(),
            })
    }

    /// Whether any field of this type may reference objects in `namespace`.
    pub fn may_reference(&self, namespace: &Namespace) -> bool {
        self.asset_fields()
            .iter()
            .any(|f| f.namespace.may_store_in(namespace))
    }

    /// Entity types whose fields may reference objects in `namespace`.
    pub fn referencing(namespace: &Namespace) -> Vec<EntityType> {
        Self::ALL
            .into_iter()
            .filter(|entity| entity.may_reference(namespace))
            .collect()
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::ALL
            .into_iter()
            .find(|entity| entity.as_str() == s)
            .ok_or_else(|| crate::Error::UnknownEntityType(s.to_string()))
    }
}
