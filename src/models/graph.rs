//! Knowledge graph types for TCM entities and their relations.
//!
//! # Entity Types
//!
//! Entity types are a closed set. Each variant maps to exactly one graph
//! label, and every node in the graph carries exactly one of these labels.
//!
//! | Type | Label | Examples |
//! |------|-------|----------|
//! | `Syndrome` | `Syndrome` | "Qi Deficiency", "Liver Qi Stagnation" |
//! | `Symptom` | `Symptom` | "Fatigue", "Night Sweats" |
//! | `Herb` | `Herb` | "Ginseng", "Astragalus" |
//! | `Formula` | `Formula` | "Si Jun Zi Tang" |
//! | `Meridian` | `Meridian` | "Spleen Meridian" |
//! | `Disease` | `Disease` | "Insomnia" |
//! | `Constitution` | `Constitution` | "Yang Deficient" |
//! | `Treatment` | `Treatment` | "Tonify Qi" |
//! | `Acupoint` | `Acupoint` | "Zusanli (ST36)" |
//! | `Food` | `Food` | "Chinese Yam" |
//! | `WellnessPractice` | `WellnessPractice` | "Baduanjin" |
//! | `Theory` | `Theory` | "Five Phases" |
//!
//! # Relation Types
//!
//! Relation types are open: any validated free-text label such as
//! `"treats"`, `"causes"` or `"contains"`.
//!
//! # Example
//!
//! ```rust
//! use lingshu::models::graph::{Entity, EntityType, Relation, RelationType};
//!
//! let syndrome = Entity::new("e1", "Qi Deficiency", EntityType::Syndrome)
//!     .with_attribute("organ", "spleen");
//! let symptom = Entity::new("e2", "Fatigue", EntityType::Symptom);
//!
//! let causes = Relation::new(&syndrome.id, &symptom.id, RelationType::new("causes")?)
//!     .with_attribute("weight", 0.8);
//! assert_eq!(causes.relation_type.as_str(), "causes");
//! # Ok::<(), lingshu::Error>(())
//! ```

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Free-form attribute map. Ordered so that fingerprints are stable.
pub type Attributes = BTreeMap<String, Value>;

/// Property keys owned by the node identity; never stored as attributes.
pub const RESERVED_KEYS: [&str; 2] = ["id", "name"];

/// Maximum length of a relation type label.
pub const MAX_RELATION_TYPE_LEN: usize = 64;

/// Type of entity in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Pattern of disharmony (证型).
    Syndrome,
    /// Observable sign or complaint (症候).
    Symptom,
    /// Single medicinal substance (药物).
    Herb,
    /// Prescription composed of herbs (方剂).
    Formula,
    /// Channel of the meridian system (经络).
    Meridian,
    /// Disease in the biomedical or TCM sense (疾病).
    Disease,
    /// Body constitution type (体质).
    Constitution,
    /// Treatment principle or method.
    Treatment,
    /// Acupuncture point (穴位).
    Acupoint,
    /// Dietary ingredient (食材).
    Food,
    /// Health-preservation practice (养生方法).
    WellnessPractice,
    /// Theoretical concept (中医理论).
    Theory,
}

impl EntityType {
    /// Returns all entity type variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Syndrome,
            Self::Symptom,
            Self::Herb,
            Self::Formula,
            Self::Meridian,
            Self::Disease,
            Self::Constitution,
            Self::Treatment,
            Self::Acupoint,
            Self::Food,
            Self::WellnessPractice,
            Self::Theory,
        ]
    }

    /// Returns the graph label used to tag nodes of this type.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Syndrome => "Syndrome",
            Self::Symptom => "Symptom",
            Self::Herb => "Herb",
            Self::Formula => "Formula",
            Self::Meridian => "Meridian",
            Self::Disease => "Disease",
            Self::Constitution => "Constitution",
            Self::Treatment => "Treatment",
            Self::Acupoint => "Acupoint",
            Self::Food => "Food",
            Self::WellnessPractice => "WellnessPractice",
            Self::Theory => "Theory",
        }
    }

    /// Returns the entity type as a snake-case string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Syndrome => "syndrome",
            Self::Symptom => "symptom",
            Self::Herb => "herb",
            Self::Formula => "formula",
            Self::Meridian => "meridian",
            Self::Disease => "disease",
            Self::Constitution => "constitution",
            Self::Treatment => "treatment",
            Self::Acupoint => "acupoint",
            Self::Food => "food",
            Self::WellnessPractice => "wellness_practice",
            Self::Theory => "theory",
        }
    }

    /// Maps a graph label back to its entity type. Exact match only.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::all().iter().copied().find(|t| t.label() == label)
    }

    /// Parses an entity type from a string.
    ///
    /// Accepts labels, snake-case names, common synonyms and the Chinese
    /// category names used by the upstream knowledge base.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if let Some(t) = Self::from_label(s) {
            return Some(t);
        }
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "syndrome" | "pattern" | "证型" | "证候" => Some(Self::Syndrome),
            "symptom" | "sign" | "症候" | "症状" => Some(Self::Symptom),
            "herb" | "medicinal" | "药物" | "中药" => Some(Self::Herb),
            "formula" | "prescription" | "方剂" => Some(Self::Formula),
            "meridian" | "channel" | "经络" => Some(Self::Meridian),
            "disease" | "疾病" => Some(Self::Disease),
            "constitution" | "体质" => Some(Self::Constitution),
            "treatment" | "therapy" | "治法" => Some(Self::Treatment),
            "acupoint" | "point" | "穴位" => Some(Self::Acupoint),
            "food" | "ingredient" | "食材" => Some(Self::Food),
            "wellness_practice" | "wellnesspractice" | "practice" | "养生方法" => {
                Some(Self::WellnessPractice)
            },
            "theory" | "concept" | "中医理论" => Some(Self::Theory),
            _ => None,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Free-text relation label, validated for use as a graph edge type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelationType(String);

impl RelationType {
    /// Creates a relation type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the label is blank, longer than
    /// [`MAX_RELATION_TYPE_LEN`] characters, or contains control characters.
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let trimmed = label.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput(
                "relation type must not be empty".to_string(),
            ));
        }
        if trimmed.chars().count() > MAX_RELATION_TYPE_LEN {
            return Err(Error::InvalidInput(format!(
                "relation type exceeds {MAX_RELATION_TYPE_LEN} characters"
            )));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(Error::InvalidInput(
                "relation type must not contain control characters".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the relation type as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Renders the label as a quoted Cypher identifier.
    ///
    /// Edge types cannot be bound as parameters, so they are backtick-quoted
    /// with embedded backticks doubled.
    #[must_use]
    pub fn cypher_identifier(&self) -> String {
        format!("`{}`", self.0.replace('`', "``"))
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RelationType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RelationType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RelationType> for String {
    fn from(value: RelationType) -> Self {
        value.0
    }
}

impl std::str::FromStr for RelationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// An entity (node) in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Caller-assigned identifier, unique within a graph.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Domain category; becomes the node label.
    pub entity_type: EntityType,
    /// Free-form attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

impl Entity {
    /// Creates an entity without attributes.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type,
            attributes: Attributes::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds several attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = (String, Value)>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Structural fingerprint over `(id, name, type, sorted attributes)`.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        fingerprint(&serde_json::json!([
            self.id,
            self.name,
            self.entity_type.label(),
            self.attributes
        ]))
    }
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Source entity ID.
    pub source_id: String,
    /// Target entity ID.
    pub target_id: String,
    /// Edge label.
    pub relation_type: RelationType,
    /// Free-form attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

impl Relation {
    /// Creates a relation without attributes.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        target_id: impl Into<String>,
        relation_type: RelationType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            target_id: target_id.into(),
            relation_type,
            attributes: Attributes::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Structural fingerprint over `(source, target, type, sorted attributes)`.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 32] {
        fingerprint(&serde_json::json!([
            self.source_id,
            self.target_id,
            self.relation_type.as_str(),
            self.attributes
        ]))
    }
}

/// A one-hop neighbour together with the edge that leads to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    /// The neighbouring entity.
    pub entity: Entity,
    /// Type of the traversed edge.
    pub relation_type: RelationType,
    /// Attributes of the traversed edge.
    #[serde(default)]
    pub relation_attributes: Attributes,
}

/// Which way a one-hop traversal follows edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Edges leaving the origin.
    #[default]
    Outgoing,
    /// Edges arriving at the origin.
    Incoming,
}

/// Both edge directions around one entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRelations {
    /// Neighbours reached over edges leaving the entity.
    pub outgoing: Vec<RelatedEntity>,
    /// Neighbours whose edges arrive at the entity.
    pub incoming: Vec<RelatedEntity>,
}

impl EntityRelations {
    /// Groups neighbours by relation type, each list in query order.
    #[must_use]
    pub fn grouped(list: &[RelatedEntity]) -> BTreeMap<&str, Vec<&RelatedEntity>> {
        let mut groups: BTreeMap<&str, Vec<&RelatedEntity>> = BTreeMap::new();
        for related in list {
            groups
                .entry(related.relation_type.as_str())
                .or_default()
                .push(related);
        }
        groups
    }
}

/// A node of a directed knowledge hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyNode {
    /// The entity at this position.
    pub entity: Entity,
    /// Edge type from the parent, `None` at the root.
    pub relation_type: Option<RelationType>,
    /// Children ordered by entity id.
    #[serde(default)]
    pub children: Vec<HierarchyNode>,
}

impl HierarchyNode {
    /// Creates a leaf.
    #[must_use]
    pub const fn leaf(entity: Entity, relation_type: Option<RelationType>) -> Self {
        Self {
            entity,
            relation_type,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including itself.
    #[must_use]
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(Self::size).sum::<usize>()
    }

    /// Inserts a root-to-leaf chain below this node, reusing children that
    /// already carry the same id. A step that revisits an id already on the
    /// chain ends it, so directed cycles never repeat.
    pub fn insert_chain<I>(&mut self, steps: I)
    where
        I: IntoIterator<Item = (Entity, RelationType)>,
    {
        let mut ancestors = vec![self.entity.id.clone()];
        let mut cursor = self;
        for (entity, relation_type) in steps {
            if ancestors.contains(&entity.id) {
                return;
            }
            ancestors.push(entity.id.clone());
            let position = match cursor.children.iter().position(|c| c.entity.id == entity.id) {
                Some(position) => position,
                None => {
                    cursor.children.push(Self::leaf(entity, Some(relation_type)));
                    cursor.children.len() - 1
                },
            };
            cursor = &mut cursor.children[position];
        }
    }

    /// Orders every level by entity id.
    pub fn sort(&mut self) {
        self.children.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
        for child in &mut self.children {
            child.sort();
        }
    }
}

/// A recommended entity and how strongly the seeds point to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// The recommended entity.
    pub entity: Entity,
    /// Number of one- and two-hop paths from the seeds reaching it.
    pub relevance: u64,
}

/// One step along a path.
///
/// `relation` is the edge traversed to reach `entity`, so the first step of
/// every path has `relation == None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathStep {
    /// Entity reached at this step.
    pub entity: Entity,
    /// Edge leading into this entity, `None` for the path origin.
    pub relation: Option<Relation>,
}

/// Pairs path nodes with their incoming edges.
///
/// `nodes[i]` pairs with `relations[i - 1]`; `nodes[0]` pairs with `None`.
/// Surplus relations are ignored.
#[must_use]
pub fn pair_path(nodes: Vec<Entity>, relations: Vec<Relation>) -> Vec<PathStep> {
    let mut incoming = relations.into_iter();
    nodes
        .into_iter()
        .enumerate()
        .map(|(i, entity)| PathStep {
            entity,
            relation: if i == 0 { None } else { incoming.next() },
        })
        .collect()
}

/// A bounded-depth neighbourhood, with nodes and edges each listed once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subgraph {
    /// Distinct nodes, in first-seen order.
    pub nodes: Vec<Entity>,
    /// Distinct edges, in first-seen order.
    pub relationships: Vec<Relation>,
    /// True when a node cap or row limit cut the neighbourhood short.
    #[serde(default)]
    pub truncated: bool,
}

impl Subgraph {
    /// Creates an empty subgraph.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            nodes: Vec::new(),
            relationships: Vec::new(),
            truncated: false,
        }
    }

    /// Returns true if the subgraph has no nodes and no edges.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

/// Accumulates a [`Subgraph`], dropping structural duplicates.
///
/// With a node cap, nodes past the cap are refused and every edge touching
/// a refused node is dropped, so the result never references a node it
/// does not list.
#[derive(Debug, Default)]
pub struct SubgraphBuilder {
    graph: Subgraph,
    max_nodes: Option<usize>,
    seen_nodes: HashSet<[u8; 32]>,
    node_ids: HashSet<String>,
    refused_ids: HashSet<String>,
    seen_relations: HashSet<[u8; 32]>,
}

impl SubgraphBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the number of distinct node ids.
    #[must_use]
    pub const fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = Some(max_nodes);
        self
    }

    /// Adds a node; returns false if an equal node was already present or
    /// the node cap refused it.
    pub fn add_node(&mut self, entity: Entity) -> bool {
        if !self.node_ids.contains(&entity.id)
            && self.max_nodes.is_some_and(|max| self.node_ids.len() >= max)
        {
            self.graph.truncated = true;
            self.refused_ids.insert(entity.id);
            return false;
        }
        if self.seen_nodes.insert(entity.fingerprint()) {
            self.node_ids.insert(entity.id.clone());
            self.graph.nodes.push(entity);
            true
        } else {
            false
        }
    }

    /// Adds an edge; returns false if an equal edge was already present or
    /// an endpoint was refused.
    pub fn add_relation(&mut self, relation: Relation) -> bool {
        if self.refused_ids.contains(&relation.source_id)
            || self.refused_ids.contains(&relation.target_id)
        {
            return false;
        }
        if self.seen_relations.insert(relation.fingerprint()) {
            self.graph.relationships.push(relation);
            true
        } else {
            false
        }
    }

    /// Flags the result as incomplete.
    pub const fn mark_truncated(&mut self) {
        self.graph.truncated = true;
    }

    /// Finishes the subgraph.
    #[must_use]
    pub fn build(self) -> Subgraph {
        self.graph
    }
}

fn fingerprint(canonical: &Value) -> [u8; 32] {
    // serde_json maps are BTreeMaps, so nested objects serialize sorted.
    let bytes = serde_json::to_vec(canonical).unwrap_or_default();
    Sha256::digest(&bytes).into()
}
