pub mod jpeg;
pub mod png;
pub mod tar;

use crate::registry::FileFormat;

pub use jpeg::Jpeg;
pub use png::Png;
pub use tar::Tar;

/// Built-in formats, most specific first. Tar comes first so that archive
/// headers win over the files stored inside them.
pub fn builtin() -> Vec<Box<dyn FileFormat>> {
    vec![Box::new(Tar), Box::new(Png), Box::new(Jpeg)]
}
