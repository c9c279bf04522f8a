use std::path::Path;

use crate::config::{expand_home, ConfigError};

/// Anchor count that selects the tiny topology.
pub const TINY_ANCHOR_COUNT: usize = 6;

/// Box-shape priors, in network input pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
    anchors: Vec<(f32, f32)>,
}

impl AnchorSet {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = expand_home(path);
        let content = std::fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("").trim();
        if line.is_empty() {
            return Err(ConfigError::EmptyAnchors(path));
        }
        Self::parse(line)
    }

    /// Parses a single comma-delimited line of floats into (width, height) pairs.
    pub fn parse(line: &str) -> Result<Self, ConfigError> {
        let values = line
            .split(',')
            .map(|v| {
                let v = v.trim();
                v.parse::<f32>()
                    .map_err(|_| ConfigError::InvalidAnchor(v.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if values.len() % 2 != 0 {
            return Err(ConfigError::OddAnchorCount(values.len()));
        }

        let anchors = values.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        Ok(Self { anchors })
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<(f32, f32)> {
        self.anchors.get(index).copied()
    }

    pub fn is_tiny(&self) -> bool {
        self.anchors.len() == TINY_ANCHOR_COUNT
    }
}

/// Ordered class names; position is the class index.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassCatalog {
    names: Vec<String>,
}

impl ClassCatalog {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let path = expand_home(path);
        let content = std::fs::read_to_string(&path)?;
        let catalog = Self::parse(&content);
        if catalog.is_empty() {
            return Err(ConfigError::NoClasses(path));
        }
        Ok(catalog)
    }

    pub fn parse(content: &str) -> Self {
        let names = content
            .lines()
            .map(|line| line.trim().to_string())
            .collect();
        Self { names }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("yolodet-{}-{name}", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_parse_anchors() {
        let anchors = AnchorSet::parse("10,13, 16,30, 33,23").unwrap();
        assert_eq!(anchors.len(), 3);
        assert_eq!(anchors.get(1), Some((16.0, 30.0)));
        assert!(!anchors.is_tiny());
    }

    #[test]
    fn test_odd_anchor_count_fails() {
        assert!(matches!(
            AnchorSet::parse("10,13,16"),
            Err(ConfigError::OddAnchorCount(3))
        ));
        assert!(matches!(
            AnchorSet::parse("10,abc"),
            Err(ConfigError::InvalidAnchor(_))
        ));
    }

    #[test]
    fn test_load_anchors_reads_first_line_only() {
        let path = temp_file(
            "tiny_anchors.txt",
            "10,14,  23,27,  37,58,  81,82,  135,169,  344,319\n1,2\n",
        );
        let anchors = AnchorSet::load(&path).unwrap();
        assert_eq!(anchors.len(), 6);
        assert!(anchors.is_tiny());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_load_classes_trims_whitespace() {
        let path = temp_file("classes.txt", "  person\ncat \r\n dog\n");
        let catalog = ClassCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.name(0), Some("person"));
        assert_eq!(catalog.name(1), Some("cat"));
        assert_eq!(catalog.name(2), Some("dog"));
        assert_eq!(catalog.name(3), None);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let missing = std::env::temp_dir().join("yolodet-does-not-exist.txt");
        assert!(matches!(
            ClassCatalog::load(&missing),
            Err(ConfigError::Io(_))
        ));
    }
}
