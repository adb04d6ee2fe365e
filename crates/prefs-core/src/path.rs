use std::fmt;

pub const PATH_SEPARATOR: char = '/';

/// Depth of the node that owns a backing file.
pub const LOAD_LEVEL_DEPTH: usize = 2;

/// Role of a node in the hierarchy, fixed by its depth when the node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Scope,
    LoadLevel,
    Leaf,
}

impl NodeKind {
    pub fn from_depth(depth: usize) -> Self {
        match depth {
            0 => NodeKind::Root,
            1 => NodeKind::Scope,
            LOAD_LEVEL_DEPTH => NodeKind::LoadLevel,
            _ => NodeKind::Leaf,
        }
    }

    pub fn owns_backing_file(&self) -> bool {
        matches!(self, NodeKind::LoadLevel)
    }

    pub fn has_load_level(&self) -> bool {
        matches!(self, NodeKind::LoadLevel | NodeKind::Leaf)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Scope => "scope",
            NodeKind::LoadLevel => "load-level",
            NodeKind::Leaf => "leaf",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absolute, normalized node path. Empty segments are dropped, so any
/// string parses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrefPath {
    segments: Vec<String>,
}

impl PrefPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn parse(input: &str) -> Self {
        let segments = input
            .split(PATH_SEPARATOR)
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::from_depth(self.segment_count())
    }

    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn scope(&self) -> Option<&str> {
        self.segment(0)
    }

    /// Name of the load-level ancestor (segment index 1), which names the
    /// backing file.
    pub fn qualifier(&self) -> Option<&str> {
        self.segment(LOAD_LEVEL_DEPTH - 1)
    }

    pub fn parent(&self) -> Option<PrefPath> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Appends `name`, splitting it on the separator first.
    pub fn child(&self, name: &str) -> PrefPath {
        let mut segments = self.segments.clone();
        segments.extend(
            name.split(PATH_SEPARATOR)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string),
        );
        Self { segments }
    }

    pub fn load_level(&self) -> Option<PrefPath> {
        if self.segment_count() < LOAD_LEVEL_DEPTH {
            return None;
        }
        Some(Self {
            segments: self.segments[..LOAD_LEVEL_DEPTH].to_vec(),
        })
    }

    pub fn starts_with(&self, ancestor: &PrefPath) -> bool {
        self.segments.starts_with(&ancestor.segments)
    }

    /// Segments below `ancestor`, or `None` when `ancestor` is not a prefix.
    pub fn relative_to(&self, ancestor: &PrefPath) -> Option<&[String]> {
        if !self.starts_with(ancestor) {
            return None;
        }
        Some(&self.segments[ancestor.segment_count()..])
    }
}

impl fmt::Display for PrefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "{PATH_SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}

impl From<&str> for PrefPath {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}
