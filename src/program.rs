//! Keyword-variant program cache.
//!
//! A [`Material`] owns one program source and compiles it lazily once per
//! distinct keyword set. Lookups hand back the compiled handle; nothing is
//! bound as "current".

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

use thiserror::Error;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Keywords(BTreeSet<String>);

impl Keywords {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with(mut self, keyword: &str) -> Self {
        self.0.insert(keyword.to_owned());
        self
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.0.contains(keyword)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Order-independent key of the enabled keyword set.
    pub fn cache_key(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        for keyword in &self.0 {
            keyword.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl<'a> FromIterator<&'a str> for Keywords {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_owned).collect())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("program `{program}` has no keyword `{keyword}`")]
    UnknownKeyword { program: String, keyword: String },
    #[error("failed to compile `{program}`:\n{log}")]
    Diagnostic { program: String, log: String },
}

pub trait ProgramCompiler {
    type Source;
    type Program: Clone;

    fn compile(
        &mut self,
        source: &Self::Source,
        keywords: &Keywords,
    ) -> Result<Self::Program, CompileError>;
}

pub struct Material<C: ProgramCompiler> {
    source: C::Source,
    programs: HashMap<u64, Result<C::Program, CompileError>>,
}

impl<C: ProgramCompiler> Material<C> {
    pub fn new(source: C::Source) -> Self {
        Self {
            source,
            programs: HashMap::new(),
        }
    }

    /// Returns the program for `keywords`, compiling it on first use.
    ///
    /// Failures are cached like successes so a broken variant is reported
    /// once instead of every frame.
    pub fn program(
        &mut self,
        compiler: &mut C,
        keywords: &Keywords,
    ) -> Result<C::Program, CompileError> {
        let key = keywords.cache_key();
        if let Some(entry) = self.programs.get(&key) {
            return entry.clone();
        }
        let entry = compiler.compile(&self.source, keywords);
        if let Err(err) = &entry {
            log::error!("{err}");
        }
        self.programs.insert(key, entry.clone());
        entry
    }

    pub fn variant_count(&self) -> usize {
        self.programs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingCompiler {
        compiles: usize,
    }

    impl ProgramCompiler for CountingCompiler {
        type Source = &'static str;
        type Program = String;

        fn compile(
            &mut self,
            source: &Self::Source,
            keywords: &Keywords,
        ) -> Result<String, CompileError> {
            self.compiles += 1;
            if keywords.contains("BROKEN") {
                return Err(CompileError::Diagnostic {
                    program: source.to_string(),
                    log: "ERROR: 0:1: syntax error".into(),
                });
            }
            let defines: Vec<&str> = keywords.iter().collect();
            Ok(format!("{source}[{}]", defines.join(",")))
        }
    }

    #[test]
    fn cache_key_ignores_insertion_order() {
        let a = Keywords::none().with("A").with("B");
        let b: Keywords = ["B", "A"].into_iter().collect();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.cache_key(), Keywords::none().cache_key());
    }

    #[test]
    fn compiles_each_variant_once() {
        let mut compiler = CountingCompiler { compiles: 0 };
        let mut material = Material::new("display");
        let plain = material.program(&mut compiler, &Keywords::none()).unwrap();
        let again = material.program(&mut compiler, &Keywords::none()).unwrap();
        let shaded = material
            .program(&mut compiler, &Keywords::none().with("SHADING"))
            .unwrap();
        assert_eq!(plain, again);
        assert_eq!(shaded, "display[SHADING]");
        assert_eq!(compiler.compiles, 2);
        assert_eq!(material.variant_count(), 2);
    }

    #[test]
    fn failed_variant_is_not_recompiled() {
        let mut compiler = CountingCompiler { compiles: 0 };
        let mut material = Material::new("advection");
        let broken = Keywords::none().with("BROKEN");
        assert!(material.program(&mut compiler, &broken).is_err());
        assert!(material.program(&mut compiler, &broken).is_err());
        assert_eq!(compiler.compiles, 1);
        assert!(material.program(&mut compiler, &Keywords::none()).is_ok());
    }
}
