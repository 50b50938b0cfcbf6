//! Full-path codec
//!
//! A full path is a sequence of non-empty segments joined by the delimiter,
//! e.g. `a/b/c`. The same path followed by one delimiter (`a/b/`) is the
//! node-marker key under which the index stores metadata for that node.
//!
//! Every function here is pure and O(path length).

/// Node-marker key for `path`: the path followed by one delimiter.
pub fn marker(path: &str, delimiter: &str) -> String {
    let mut key = String::with_capacity(path.len() + delimiter.len());
    key.push_str(path);
    key.push_str(delimiter);
    key
}

/// Strip the node-marker delimiter, if present.
pub fn bare<'a>(path: &'a str, delimiter: &str) -> &'a str {
    path.strip_suffix(delimiter).unwrap_or(path)
}

/// Node-marker keys of every ancestor of `path`, nearest first.
///
/// `a/b/c` yields `a/b/`, then `a/`. A marker path is treated like its bare
/// form, so `a/b/` yields only `a/`.
pub fn ancestors<'a>(path: &'a str, delimiter: &'a str) -> Ancestors<'a> {
    let path = bare(path, delimiter);
    Ancestors { path, delimiter, end: path.len() }
}

/// Iterator returned by [`ancestors`].
#[derive(Debug, Clone)]
pub struct Ancestors<'a> {
    path: &'a str,
    delimiter: &'a str,
    end: usize,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        let pos = self.path[..self.end].rfind(self.delimiter)?;
        self.end = pos;
        Some(&self.path[..pos + self.delimiter.len()])
    }
}

/// Bare segment names of every ancestor of `path`, root first.
///
/// `a/b/c` yields `a`, then `b`. Used to rebuild nested containers.
pub fn ancestors_from_root<'a>(
    path: &'a str,
    delimiter: &'a str,
) -> impl Iterator<Item = &'a str> + 'a {
    bare(path, delimiter)
        .rsplit_once(delimiter)
        .into_iter()
        .flat_map(move |(head, _)| head.split(delimiter))
}

/// Last segment of `path`.
pub fn leaf_name<'a>(path: &'a str, delimiter: &str) -> &'a str {
    let path = bare(path, delimiter);
    path.rsplit_once(delimiter).map_or(path, |(_, tail)| tail)
}

/// Node-marker key of the immediate parent, or `""` for a top-level path.
pub fn parent<'a>(path: &'a str, delimiter: &str) -> &'a str {
    let stripped = bare(path, delimiter);
    stripped
        .rfind(delimiter)
        .map_or("", |pos| &path[..pos + delimiter.len()])
}

/// Join `rootpath` and `key` into a full path.
///
/// Empty segments are dropped, so a root view (empty rootpath) returns the
/// key itself and `a//b/` normalises to `a/b`. User keys therefore never end
/// with the delimiter and cannot collide with node-marker keys.
pub fn build_path(rootpath: &str, key: &str, delimiter: &str) -> String {
    let mut out = String::with_capacity(rootpath.len() + key.len() + delimiter.len());
    let segments = rootpath
        .split(delimiter)
        .chain(key.split(delimiter))
        .filter(|segment| !segment.is_empty());
    for segment in segments {
        if !out.is_empty() {
            out.push_str(delimiter);
        }
        out.push_str(segment);
    }
    out
}
