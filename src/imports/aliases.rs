//! Import name to distribution name mapping

use crate::requirement::PackageName;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AliasEntry {
    Known { package: String },
    /// Several distributions ship this module; `default` is installed.
    Ambiguous {
        default: String,
        candidates: Vec<String>,
    },
}

impl AliasEntry {
    pub fn known(package: &str) -> Self {
        AliasEntry::Known {
            package: package.to_string(),
        }
    }

    pub fn ambiguous(default: &str, others: &[&str]) -> Self {
        let mut candidates = vec![default.to_string()];
        candidates.extend(others.iter().map(|c| c.to_string()));
        AliasEntry::Ambiguous {
            default: default.to_string(),
            candidates,
        }
    }

    pub fn package(&self) -> PackageName {
        match self {
            AliasEntry::Known { package } => PackageName::new(package),
            AliasEntry::Ambiguous { default, .. } => PackageName::new(default),
        }
    }
}

const KNOWN: &[(&str, &str)] = &[
    ("Bio", "biopython"),
    ("Crypto", "pycryptodome"),
    ("OpenGL", "PyOpenGL"),
    ("PIL", "Pillow"),
    ("attr", "attrs"),
    ("bs4", "beautifulsoup4"),
    ("dateutil", "python-dateutil"),
    ("dns", "dnspython"),
    ("docx", "python-docx"),
    ("dotenv", "python-dotenv"),
    ("fitz", "PyMuPDF"),
    ("gi", "PyGObject"),
    ("git", "GitPython"),
    ("hydra", "hydra-core"),
    ("igraph", "python-igraph"),
    ("jose", "python-jose"),
    ("matplotlib_inline", "matplotlib-inline"),
    ("mpl_toolkits", "matplotlib"),
    ("multipart", "python-multipart"),
    ("pptx", "python-pptx"),
    ("skimage", "scikit-image"),
    ("sklearn", "scikit-learn"),
    ("slugify", "python-slugify"),
    ("tf", "tensorflow"),
    ("usb", "pyusb"),
    ("win32api", "pywin32"),
    ("yaml", "PyYAML"),
    ("zmq", "pyzmq"),
];

const AMBIGUOUS: &[(&str, &str, &[&str])] = &[
    (
        "cv2",
        "opencv-python",
        &["opencv-python-headless", "opencv-contrib-python"],
    ),
    ("faiss", "faiss-cpu", &["faiss-gpu"]),
    ("jwt", "PyJWT", &["python-jwt"]),
    ("magic", "python-magic", &["file-magic"]),
    ("psycopg2", "psycopg2-binary", &["psycopg2"]),
    ("serial", "pyserial", &["serial"]),
];

/// Static alias table. Modules absent from the table map to themselves.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: BTreeMap<String, AliasEntry>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for (module, package) in KNOWN {
            table.insert(module, AliasEntry::known(package));
        }
        for (module, default, others) in AMBIGUOUS {
            table.insert(module, AliasEntry::ambiguous(default, others));
        }
        table
    }

    pub fn insert(&mut self, module: &str, entry: AliasEntry) {
        self.entries.insert(module.to_string(), entry);
    }

    pub fn lookup(&self, module: &str) -> Option<&AliasEntry> {
        self.entries.get(module)
    }

    /// Distribution name for `module`, passing unknown modules through.
    pub fn package_for(&self, module: &str) -> PackageName {
        self.lookup(module)
            .map(AliasEntry::package)
            .unwrap_or_else(|| PackageName::new(module))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
