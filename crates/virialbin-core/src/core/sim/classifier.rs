use super::SampleEvent;
use crate::core::bins::BinKey;
use phf::{Map, phf_map};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maps the overlap graph of a configuration to the bin it is accumulated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classifier {
    /// Every configuration in one bin.
    Single,
    /// Bin by number of overlapping pairs.
    Edges,
    /// Bin by number of overlapping pairs and the sum of squared degrees.
    EdgesDegree,
    /// Bin by number of overlapping pairs and the number of overlapping triangles.
    EdgesTriangles,
}

static CLASSIFIERS: Map<&'static str, Classifier> = phf_map! {
    "single" => Classifier::Single,
    "edges" => Classifier::Edges,
    "edges-degree" => Classifier::EdgesDegree,
    "edges-triangles" => Classifier::EdgesTriangles,
};

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown classifier '{0}'")]
pub struct ParseClassifierError(pub String);

impl Classifier {
    /// The classifier used when none is configured.
    pub fn for_model_size(n: usize) -> Self {
        if n < 5 {
            Classifier::Edges
        } else {
            Classifier::EdgesDegree
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        CLASSIFIERS.get(name.to_ascii_lowercase().as_str()).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Classifier::Single => "single",
            Classifier::Edges => "edges",
            Classifier::EdgesDegree => "edges-degree",
            Classifier::EdgesTriangles => "edges-triangles",
        }
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        CLASSIFIERS.keys().copied()
    }

    pub fn key_len(&self) -> usize {
        match self {
            Classifier::Single | Classifier::Edges => 1,
            Classifier::EdgesDegree | Classifier::EdgesTriangles => 2,
        }
    }

    pub fn classify(&self, event: &SampleEvent) -> BinKey {
        let g = &event.graph;
        match self {
            Classifier::Single => BinKey::from([0]),
            Classifier::Edges => BinKey::from([g.edge_count()]),
            Classifier::EdgesDegree => {
                let degree_sq = (0..g.point_count()).map(|i| g.degree(i).pow(2)).sum();
                BinKey::from([g.edge_count(), degree_sq])
            }
            Classifier::EdgesTriangles => BinKey::from([g.edge_count(), g.triangle_count()]),
        }
    }
}

impl FromStr for Classifier {
    type Err = ParseClassifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| ParseClassifierError(s.to_string()))
    }
}

impl fmt::Display for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
