//! Languages a submission may be written in.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// The closed set of languages with a build recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[display("cpp")]
    Cpp,
    #[display("cs")]
    Cs,
    #[display("java")]
    Java,
    #[display("js")]
    Js,
    #[display("py")]
    Py,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Cpp,
        Language::Cs,
        Language::Java,
        Language::Js,
        Language::Py,
    ];

    /// Directory name of this language's recipe under the recipe root.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Cpp => "cpp",
            Language::Cs => "cs",
            Language::Java => "java",
            Language::Js => "js",
            Language::Py => "py",
        }
    }
}

impl FromStr for Language {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|lang| lang.as_str() == s.trim())
            .ok_or_else(|| Error::BadInput(format!("unsupported language '{}'", s)))
    }
}
