/// Source Kind Module
///
/// Classifies corpus files into the object kinds the pipeline understands.

use std::path::Path;

use crate::domain::ir::ObjectType;

/// Recognized source file kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Screen,
    UserObject,
    Menu,
    DataGrid,
    Function,
    Script,
    Library,
    Sql,
}

impl SourceKind {
    /// Infer kind from a file extension.
    pub fn from_extension(ext: &str) -> Option<SourceKind> {
        match ext.to_lowercase().as_str() {
            "srw" => Some(SourceKind::Screen),
            "sru" => Some(SourceKind::UserObject),
            "srm" => Some(SourceKind::Menu),
            "srd" => Some(SourceKind::DataGrid),
            "srf" => Some(SourceKind::Function),
            "srs" | "txt" | "psr" | "inc" => Some(SourceKind::Script),
            "pbt" | "pbl" => Some(SourceKind::Library),
            "sql" => Some(SourceKind::Sql),
            _ => None,
        }
    }

    /// Infer kind from a bare object name prefix (`w_`, `u_`, `m_`, `dw_`, `f_`).
    pub fn from_stem_prefix(stem: &str) -> Option<SourceKind> {
        let lower = stem.to_lowercase();
        if lower.starts_with("w_") {
            Some(SourceKind::Screen)
        } else if lower.starts_with("u_") {
            Some(SourceKind::UserObject)
        } else if lower.starts_with("m_") {
            Some(SourceKind::Menu)
        } else if lower.starts_with("dw_") {
            Some(SourceKind::DataGrid)
        } else if lower.starts_with("f_") {
            Some(SourceKind::Function)
        } else {
            None
        }
    }

    /// Infer kind from a file path, extension first, then stem prefix.
    pub fn from_path(path: &Path) -> Option<SourceKind> {
        let by_ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension);
        if by_ext.is_some() {
            return by_ext;
        }
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(Self::from_stem_prefix)
    }

    /// Refine kind from a `type x from <ancestor>` preamble.
    pub fn from_ancestor(ancestor: &str) -> Option<SourceKind> {
        match ancestor.to_lowercase().as_str() {
            "window" => Some(SourceKind::Screen),
            "userobject" | "nonvisualobject" => Some(SourceKind::UserObject),
            "menu" => Some(SourceKind::Menu),
            "datawindow" => Some(SourceKind::DataGrid),
            "function_object" => Some(SourceKind::Function),
            _ => None,
        }
    }

    /// Inverse of [`SourceKind::object_type`]; `Table` objects have no
    /// source kind.
    pub fn from_object_type(object_type: ObjectType) -> Option<SourceKind> {
        match object_type {
            ObjectType::Screen => Some(SourceKind::Screen),
            ObjectType::UserObject => Some(SourceKind::UserObject),
            ObjectType::Menu => Some(SourceKind::Menu),
            ObjectType::DataGrid => Some(SourceKind::DataGrid),
            ObjectType::Function => Some(SourceKind::Function),
            ObjectType::Script => Some(SourceKind::Script),
            ObjectType::Library => Some(SourceKind::Library),
            ObjectType::Sql => Some(SourceKind::Sql),
            ObjectType::Table => None,
        }
    }

    /// Whether this kind is parsed by the descriptor parser instead of the
    /// script parser.
    pub fn is_descriptor(&self) -> bool {
        matches!(self, SourceKind::DataGrid)
    }

    /// The object type this kind produces in the IR.
    pub fn object_type(&self) -> ObjectType {
        match self {
            SourceKind::Screen => ObjectType::Screen,
            SourceKind::UserObject => ObjectType::UserObject,
            SourceKind::Menu => ObjectType::Menu,
            SourceKind::DataGrid => ObjectType::DataGrid,
            SourceKind::Function => ObjectType::Function,
            SourceKind::Script => ObjectType::Script,
            SourceKind::Library => ObjectType::Library,
            SourceKind::Sql => ObjectType::Sql,
        }
    }

    pub fn name(&self) -> &'static str {
        self.object_type().as_str()
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
