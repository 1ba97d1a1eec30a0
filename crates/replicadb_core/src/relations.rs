//! Relations between collections.

use crate::schema::{CollectionSchema, Field};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Cardinality of a relation, seen from its owning collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// Many owner rows point at one target row.
    ManyToOne,
    /// One owner row per target row.
    OneToOne,
    /// One owner row is pointed at by many target rows.
    OneToMany,
}

/// A directed relation edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Relation name on the owning collection.
    pub name: String,
    /// Cardinality.
    pub kind: RelationKind,
    /// Collection on the other end.
    pub target: String,
    /// Field holding the foreign key, on whichever side carries it.
    pub foreign_key: String,
}

/// Relations of every collection, derived from leaf references.
#[derive(Debug, Clone, Default)]
pub struct RelationGraph {
    edges: BTreeMap<String, Vec<Relation>>,
}

impl RelationGraph {
    /// Builds the graph from flat collection schemas.
    ///
    /// A referencing leaf gives its collection a `ManyToOne` edge (`OneToOne`
    /// when unique) and the target the inverse `OneToMany` (`OneToOne`).
    #[must_use]
    pub fn from_collections<'a>(schemas: impl IntoIterator<Item = &'a CollectionSchema>) -> Self {
        let mut graph = Self::default();
        for schema in schemas {
            for (field_name, field) in &schema.fields {
                let Field::Leaf(leaf) = field else { continue };
                let Some(reference) = &leaf.reference else {
                    continue;
                };
                let (kind, inverse_kind) = if leaf.unique {
                    (RelationKind::OneToOne, RelationKind::OneToOne)
                } else {
                    (RelationKind::ManyToOne, RelationKind::OneToMany)
                };
                graph.add(
                    &schema.name,
                    Relation {
                        name: reference.relation_name.clone(),
                        kind,
                        target: reference.target_collection.clone(),
                        foreign_key: field_name.clone(),
                    },
                );
                graph.add(
                    &reference.target_collection,
                    Relation {
                        name: reference
                            .inverse_name
                            .clone()
                            .unwrap_or_else(|| format!("{}_{}", schema.name, field_name)),
                        kind: inverse_kind,
                        target: schema.name.clone(),
                        foreign_key: field_name.clone(),
                    },
                );
            }
        }
        graph
    }

    fn add(&mut self, collection: &str, relation: Relation) {
        self.edges
            .entry(collection.to_string())
            .or_default()
            .push(relation);
    }

    /// Relations owned by `collection`.
    pub fn relations(&self, collection: &str) -> &[Relation] {
        self.edges.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Collections whose rows a delete in `collection` may affect.
    ///
    /// Follows `ManyToOne` and `OneToOne` edges transitively, visiting each
    /// collection at most once. The result includes `collection` itself.
    pub fn delete_closure(&self, collection: &str) -> BTreeSet<String> {
        let mut visited = BTreeSet::from([collection.to_string()]);
        let mut queue = VecDeque::from([collection.to_string()]);
        while let Some(current) = queue.pop_front() {
            for relation in self.relations(&current) {
                let cascades = matches!(
                    relation.kind,
                    RelationKind::ManyToOne | RelationKind::OneToOne
                );
                if cascades && visited.insert(relation.target.clone()) {
                    queue.push_back(relation.target.clone());
                }
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldMap, LeafField, Reference};
    use replicadb_storage::ColumnType;

    fn collection(name: &str, refs: &[(&str, &str, bool)]) -> CollectionSchema {
        let mut schema = CollectionSchema::new(name, FieldMap::new())
            .with_field("id", LeafField::new(ColumnType::Integer).primary_key());
        for (field, target, unique) in refs {
            let mut leaf = LeafField::new(ColumnType::Integer)
                .with_reference(Reference::new(*field, *target, "id"));
            leaf.unique = *unique;
            schema = schema.with_field(*field, leaf);
        }
        schema
    }

    #[test]
    fn references_create_edges_both_ways() {
        let posts = collection("posts", &[("author", "users", false)]);
        let profiles = collection("profiles", &[("user", "users", true)]);
        let users = collection("users", &[]);
        let graph = RelationGraph::from_collections([&posts, &profiles, &users]);

        assert_eq!(graph.relations("posts")[0].kind, RelationKind::ManyToOne);
        assert_eq!(graph.relations("profiles")[0].kind, RelationKind::OneToOne);

        let inverse: Vec<_> = graph
            .relations("users")
            .iter()
            .map(|r| (r.name.as_str(), r.kind))
            .collect();
        assert_eq!(
            inverse,
            vec![
                ("posts_author", RelationKind::OneToMany),
                ("profiles_user", RelationKind::OneToOne),
            ]
        );
    }

    #[test]
    fn delete_closure_follows_to_one_edges() {
        let comments = collection("comments", &[("post", "posts", false)]);
        let posts = collection("posts", &[("author", "users", false)]);
        let users = collection("users", &[("team", "teams", false)]);
        let teams = collection("teams", &[]);
        let graph = RelationGraph::from_collections([&comments, &posts, &users, &teams]);

        let closure: Vec<_> = graph.delete_closure("comments").into_iter().collect();
        assert_eq!(closure, vec!["comments", "posts", "teams", "users"]);

        // One-to-many edges do not cascade.
        let from_teams: Vec<_> = graph.delete_closure("teams").into_iter().collect();
        assert_eq!(from_teams, vec!["teams"]);
    }

    #[test]
    fn delete_closure_terminates_on_cycles() {
        let a = collection("a", &[("b", "b", false)]);
        let b = collection("b", &[("a", "a", true)]);
        let graph = RelationGraph::from_collections([&a, &b]);
        assert_eq!(graph.delete_closure("a").len(), 2);
    }

    #[test]
    fn unknown_collection_has_no_relations() {
        let graph = RelationGraph::default();
        assert!(graph.relations("nope").is_empty());
        assert_eq!(graph.delete_closure("nope").len(), 1);
    }
}
