//! Package a git commit as a distributable SugarCube mod.
//!
//! `commit2mod` turns a single commit into a mod package for the Twine
//! modding host: files *added* by the commit are copied into the package
//! verbatim, while files *modified* by the commit are reduced to minimal,
//! replayable find/replace operations. A `.twee` change is attributed to the
//! enclosing passage (the nearest `::` header above it) and becomes a
//! `TweeReplacer` parameter; a `.js` change is attributed to its file name
//! and becomes a `ReplacePatcher` parameter. The package directory plus a
//! `boot.json` manifest is finally bundled into a zip archive.
//!
//! The interesting part is the diff-to-patch extraction engine: it consumes
//! unified-diff hunks and emits one `(find, replace)` pair per hunk such that
//! a literal substring replacement of `find` with `replace` reproduces the
//! hunk's effect on matching content. It handles pure insertions, pure
//! deletions, and mixed hunks, and it never applies or merges patches itself.
//!
//! ## Getting Started
//!
//! The extraction pipeline is pure: given a unified diff and the file content
//! at the commit, it produces the patch operations without touching git.
//!
//! ```rust
//! use commit2mod::passage_patches_from_diff;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let diff = "\
//! @@ -2,2 +2,3 @@
//!  Alice said hello.
//! +Bob waved back.
//!  The sun set.
//! ";
//! let content = ":: Greeting Scene\nAlice said hello.\nThe sun set.\n";
//!
//! let ops = passage_patches_from_diff(diff, content)?;
//! assert_eq!(ops.len(), 1);
//! assert_eq!(ops[0].passage, "Greeting Scene");
//! assert_eq!(ops[0].find, "Alice said hello.");
//! assert_eq!(ops[0].replace, "Alice said hello.\nBob waved back.");
//! # Ok(())
//! # }
//! ```
//!
//! The end-to-end flow (list the commit's changes, extract patches, assemble
//! the package, write `boot.json`, bundle the zip) is driven by [`build_mod`],
//! which shells out to the `git` CLI for content and diffs.
//!
//! ## Key Concepts
//!
//! ### The extraction pipeline
//!
//! 1. **Change classification:** [`classify_changes`] splits the commit's
//!    `status<TAB>path` change list into new and modified paths. Deletions
//!    are dropped; a rename counts as a plain modification of the new path.
//! 2. **Hunk parsing:** [`parse_hunks`] scans a unified diff line by line
//!    and yields one [`Hunk`] per `@@ -l,s +l,s @@` header.
//! 3. **Line classification:** [`classify_hunk`] partitions a hunk body
//!    into leading context, added, removed, and (for `.twee`) trailing
//!    context. `.js` hunks keep at most two lines of leading context, which
//!    bounds the lookup window used when the patch is later replayed.
//! 4. **Synthesis:** [`ClassifiedHunk::replacement`] builds the single
//!    `(find, replace)` pair for the hunk. `find` always denotes text that is
//!    present in the pre-change file.
//! 5. **Passage resolution:** [`resolve_passage`] scans backward from the
//!    hunk's old starting line for the nearest `::` header and normalizes
//!    its name.
//!
//! ### Failure policy
//!
//! Per-file problems (a diff that fails to parse, content git cannot
//! produce) are logged and skipped; the remaining files are still processed.
//! Only failure to resolve the target commit aborts a run.

use log::{debug, info, trace, warn};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

// --- Constants ---

/// Marker that opens a passage header line in a `.twee` file.
pub const PASSAGE_MARKER: &str = "::";

/// Annotation token stripped from passage names (e.g. `:: Hints [widget]`).
pub const WIDGET_TAG: &str = "[widget]";

/// Sentinel passage name returned when no header precedes a change.
pub const UNKNOWN_PASSAGE: &str = "Unknown Passage";

/// Maximum lines of leading context retained for `.js` hunks.
pub const SCRIPT_CONTEXT_CAP: usize = 2;

// --- Error Types ---

/// Represents errors that can occur while parsing a unified diff.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// A `@@` line did not match the `@@ -<old>,<count> +<new>,<count> @@`
    /// grammar (e.g. non-numeric line numbers). The affected file's diff is
    /// abandoned; other files in the commit are still processed.
    #[error("Malformed hunk header: '{header}'")]
    MalformedHunkHeader {
        /// The offending header line.
        header: String,
    },
}

/// Represents errors from the `git` subprocess collaborator.
#[derive(Error, Debug)]
pub enum GitError {
    /// The `git` binary could not be launched at all.
    #[error("Failed to launch git: {source}")]
    Launch {
        #[source]
        source: std::io::Error,
    },
    /// git ran but exited non-zero (e.g. ambiguous revision, unknown path).
    #[error("git {args} failed: {stderr}")]
    CommandFailed {
        /// The argument list that was passed to git, joined for display.
        args: String,
        /// Trimmed stderr of the failed invocation.
        stderr: String,
    },
}

/// Represents errors during package assembly and bundling.
#[derive(Error, Debug)]
pub enum PackageError {
    /// A change-list path would escape the package directory (`..`).
    #[error("Path '{0}' escapes the package directory")]
    UnsafePath(PathBuf),
    /// An I/O error occurred while reading or writing a package file.
    #[error("I/O error while processing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The manifest could not be serialized.
    #[error("Failed to serialize manifest: {0}")]
    Json(#[from] serde_json::Error),
    /// The zip archive could not be written.
    #[error("Failed to write zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// The reason a single file was skipped during extraction.
///
/// Both variants are non-fatal: the orchestrator logs them and moves on to
/// the next file in the change list.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// git could not produce the diff or content for the file.
    #[error(transparent)]
    Git(#[from] GitError),
    /// The file's diff did not parse.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// A fatal error from a full [`build_mod`] run.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The commit's change list could not be retrieved.
    #[error(transparent)]
    Git(#[from] GitError),
    /// The package directory, manifest, or zip could not be written.
    #[error(transparent)]
    Package(#[from] PackageError),
}

// --- Data Structures ---

/// The kind of a single line within a hunk body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineTag {
    /// Unchanged line, prefixed with `' '` in the diff.
    Context,
    /// Line added by the commit, prefixed with `'+'`.
    Added,
    /// Line removed by the commit, prefixed with `'-'`.
    Removed,
}

/// A single hunk body line with its diff marker stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    /// How the line is tagged in the diff.
    pub tag: LineTag,
    /// The line content without the leading marker character.
    pub text: String,
}

/// A single hunk of a unified diff.
///
/// Corresponds to one `@@ -l,s +l,s @@` block. The counts from the header are
/// not retained; they are recoverable from the body and nothing downstream
/// reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-based starting line in the old file version.
    pub old_start: usize,
    /// 1-based starting line in the new file version.
    pub new_start: usize,
    /// The body lines, in file order.
    pub lines: Vec<RawLine>,
}

/// Controls how much context a [`ClassifiedHunk`] retains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextMode {
    /// `.twee` files: unlimited leading context, trailing context collected.
    Passage,
    /// `.js` files: at most [`SCRIPT_CONTEXT_CAP`] lines of leading context,
    /// no trailing context.
    Script,
}

/// A hunk body partitioned into context and change groups.
///
/// Produced by [`classify_hunk`]. Ordering within each group matches the
/// original file order. `context_after` is collected for passage hunks but is
/// not consulted when building the replacement pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifiedHunk {
    /// Context lines preceding the first added or removed line.
    pub context_before: Vec<String>,
    /// Lines added by the hunk.
    pub added: Vec<String>,
    /// Lines removed by the hunk.
    pub removed: Vec<String>,
    /// Context lines after the first change (passage mode only).
    pub context_after: Vec<String>,
}

impl ClassifiedHunk {
    /// Checks whether the hunk carries any effective change.
    ///
    /// A hunk with only context lines produces no patch operation.
    ///
    /// # Example
    ///
    /// ```
    /// # use commit2mod::ClassifiedHunk;
    /// let mut hunk = ClassifiedHunk::default();
    /// hunk.context_before.push("unchanged".to_string());
    /// assert!(!hunk.has_changes());
    ///
    /// hunk.added.push("fresh line".to_string());
    /// assert!(hunk.has_changes());
    /// ```
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }

    /// Builds the `(find, replace)` pair for this hunk.
    ///
    /// Returns `None` when the hunk has no changes. Otherwise the pair is
    /// built by shape:
    ///
    /// - insert-only: `find` is the leading context, `replace` appends the
    ///   added lines to it;
    /// - delete-only: `find` is the leading context plus the removed lines,
    ///   `replace` is the leading context alone;
    /// - mixed: `find` is context plus removed, `replace` is context plus
    ///   added.
    ///
    /// Groups are joined with a single `\n`; an empty group joins to the
    /// empty string. `find` therefore always denotes text present in the
    /// pre-change file, so a literal substring replacement replays the hunk.
    ///
    /// # Example
    ///
    /// ```
    /// # use commit2mod::ClassifiedHunk;
    /// let hunk = ClassifiedHunk {
    ///     context_before: vec!["Alice said hello.".to_string()],
    ///     added: vec!["Bob waved back.".to_string()],
    ///     removed: vec![],
    ///     context_after: vec!["The sun set.".to_string()],
    /// };
    /// let (find, replace) = hunk.replacement().unwrap();
    /// assert_eq!(find, "Alice said hello.");
    /// assert_eq!(replace, "Alice said hello.\nBob waved back.");
    /// ```
    pub fn replacement(&self) -> Option<(String, String)> {
        if !self.has_changes() {
            return None;
        }
        let pair = if self.removed.is_empty() {
            (
                self.context_before.join("\n"),
                join_groups(&self.context_before, &self.added),
            )
        } else if self.added.is_empty() {
            (
                join_groups(&self.context_before, &self.removed),
                self.context_before.join("\n"),
            )
        } else {
            (
                join_groups(&self.context_before, &self.removed),
                join_groups(&self.context_before, &self.added),
            )
        };
        Some(pair)
    }
}

/// Joins two line groups in order with a single newline separator.
fn join_groups(head: &[String], tail: &[String]) -> String {
    head.iter()
        .chain(tail.iter())
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n")
}

/// The commit's changed paths, split by how the packager treats them.
///
/// Deleted paths are dropped during classification and appear in neither
/// list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Paths added by the commit; copied into the package verbatim.
    pub new_paths: Vec<String>,
    /// Paths modified (or renamed) by the commit; routed to the diff
    /// pipeline.
    pub modified_paths: Vec<String>,
}

/// One replayable find/replace operation for a `.twee` passage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassagePatch {
    /// Name of the enclosing passage, or [`UNKNOWN_PASSAGE`].
    pub passage: String,
    /// Text to locate in the live passage content.
    #[serde(rename = "findString")]
    pub find: String,
    /// Text that replaces `find`.
    pub replace: String,
}

/// One replayable find/replace operation for a `.js` file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptPatch {
    /// Text to locate in the live script content.
    pub from: String,
    /// Text that replaces `from`.
    pub to: String,
    /// Base name of the script file the patch applies to.
    #[serde(rename = "fileName")]
    pub file_name: String,
}

/// Everything extracted from one commit: new files plus both patch lists.
///
/// Patch ordering follows the change list, then hunk order within each file.
#[derive(Debug, Clone, Default)]
pub struct CommitPatches {
    /// Paths added by the commit, in change-list order (may repeat if the
    /// upstream change list reports a path twice).
    pub new_files: Vec<String>,
    /// Passage patches from modified `.twee` files.
    pub passage_patches: Vec<PassagePatch>,
    /// Script patches from modified `.js` files.
    pub script_patches: Vec<ScriptPatch>,
}

// --- Core Logic ---

/// Parses the unified diff text for one file into a sequence of [`Hunk`]s.
///
/// The scanner walks the text line by line, tracking whether it is inside a
/// hunk body. A body extends from its `@@` header to the next header or the
/// end of the text. Lines before the first header (the `diff --git`, `index`,
/// `---`/`+++` preamble) are skipped, as are `\ No newline at end of file`
/// markers, blank separator lines, and any stray `---`/`+++` headers inside a
/// body.
///
/// A diff with no hunk headers yields an empty vector, not an error.
///
/// # Errors
///
/// Returns [`ParseError::MalformedHunkHeader`] when a `@@` line does not
/// carry parseable line numbers.
///
/// # Example
///
/// ```
/// use commit2mod::{parse_hunks, LineTag};
///
/// let diff = "\
/// diff --git a/scene.twee b/scene.twee
/// --- a/scene.twee
/// +++ b/scene.twee
/// @@ -4,3 +4,4 @@
///  Alice said hello.
/// +Bob waved back.
///  The sun set.
/// ";
/// let hunks = parse_hunks(diff).unwrap();
/// assert_eq!(hunks.len(), 1);
/// assert_eq!(hunks[0].old_start, 4);
/// assert_eq!(hunks[0].new_start, 4);
/// assert_eq!(hunks[0].lines.len(), 3);
/// assert_eq!(hunks[0].lines[1].tag, LineTag::Added);
/// assert_eq!(hunks[0].lines[1].text, "Bob waved back.");
/// ```
pub fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, ParseError> {
    let mut hunks = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("@@") {
            // A header ends the previous body and opens a new one.
            if let Some(hunk) = current.take() {
                hunks.push(hunk);
            }
            let (old_start, new_start) =
                parse_hunk_header(line).ok_or_else(|| ParseError::MalformedHunkHeader {
                    header: line.to_string(),
                })?;
            current = Some(Hunk {
                old_start,
                new_start,
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = current.as_mut() else {
            // Preamble before the first hunk header.
            continue;
        };

        if let Some(text) = line.strip_prefix('+') {
            if line.starts_with("++") {
                // `+++ b/...` file header, not a content line.
                continue;
            }
            hunk.lines.push(RawLine {
                tag: LineTag::Added,
                text: text.to_string(),
            });
        } else if let Some(text) = line.strip_prefix('-') {
            if line.starts_with("--") {
                continue;
            }
            hunk.lines.push(RawLine {
                tag: LineTag::Removed,
                text: text.to_string(),
            });
        } else if let Some(text) = line.strip_prefix(' ') {
            hunk.lines.push(RawLine {
                tag: LineTag::Context,
                text: text.to_string(),
            });
        } else {
            // Blank separators, `\ No newline at end of file`, or trailing
            // `diff --git`/`index` lines of a following section.
            trace!("  Skipping non-content diff line: '{}'", line);
        }
    }

    if let Some(hunk) = current {
        hunks.push(hunk);
    }

    Ok(hunks)
}

/// Parses a hunk header (e.g. `@@ -21,8 +23,9 @@`) into its start lines.
///
/// The count parts are optional (`@@ -5 +5 @@` is accepted); they are ignored
/// downstream either way.
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let mut parts = line.split_whitespace();
    if parts.next() != Some("@@") {
        return None;
    }
    let old = parts
        .next()?
        .strip_prefix('-')?
        .split(',')
        .next()?
        .parse::<usize>()
        .ok()?;
    let new = parts
        .next()?
        .strip_prefix('+')?
        .split(',')
        .next()?
        .parse::<usize>()
        .ok()?;
    Some((old, new))
}

/// Partitions a hunk body into context and change groups.
///
/// Iterates the body in order. The first added or removed line permanently
/// ends the leading-context phase; later context lines go to `context_after`
/// (passage mode) or are dropped (script mode). Script mode additionally
/// caps `context_before` at [`SCRIPT_CONTEXT_CAP`] lines.
///
/// Classification is a pure function of the hunk and mode: classifying the
/// same body twice yields identical results.
///
/// # Example
///
/// ```
/// use commit2mod::{classify_hunk, parse_hunks, ContextMode};
///
/// let diff = "\
/// @@ -1,5 +1,5 @@
///  let a = 1;
///  let b = 2;
///  let c = 3;
/// -oldCall();
/// +newCall();
/// ";
/// let hunks = parse_hunks(diff).unwrap();
///
/// // Script mode keeps only the first two context lines.
/// let script = classify_hunk(&hunks[0], ContextMode::Script);
/// assert_eq!(script.context_before, vec!["let a = 1;", "let b = 2;"]);
///
/// // Passage mode keeps them all.
/// let passage = classify_hunk(&hunks[0], ContextMode::Passage);
/// assert_eq!(passage.context_before.len(), 3);
/// ```
pub fn classify_hunk(hunk: &Hunk, mode: ContextMode) -> ClassifiedHunk {
    let mut classified = ClassifiedHunk::default();
    let mut in_context_before = true;

    for line in &hunk.lines {
        match line.tag {
            LineTag::Added => {
                classified.added.push(line.text.clone());
                in_context_before = false;
            }
            LineTag::Removed => {
                classified.removed.push(line.text.clone());
                in_context_before = false;
            }
            LineTag::Context => {
                if in_context_before {
                    match mode {
                        ContextMode::Passage => {
                            classified.context_before.push(line.text.clone());
                        }
                        ContextMode::Script => {
                            if classified.context_before.len() < SCRIPT_CONTEXT_CAP {
                                classified.context_before.push(line.text.clone());
                            }
                        }
                    }
                } else if mode == ContextMode::Passage {
                    classified.context_after.push(line.text.clone());
                }
            }
        }
    }

    classified
}

/// Resolves the passage that owns the given line of a `.twee` file.
///
/// Scans from `line_index` down to `0`, inclusive of the target line itself:
/// a change occurring exactly on a header line attributes to that header.
/// The passage name is the header text after the `::` marker, with the first
/// `[widget]` token removed and surrounding whitespace trimmed.
///
/// Returns [`UNKNOWN_PASSAGE`] when no header precedes the line; indices
/// beyond the content length are skipped without error.
///
/// # Example
///
/// ```
/// use commit2mod::{resolve_passage, UNKNOWN_PASSAGE};
///
/// let lines = vec![
///     ":: Greeting Scene",
///     "Alice said hello.",
///     "The sun set.",
///     ":: Hints [widget]",
///     "<<hint>>",
/// ];
/// assert_eq!(resolve_passage(&lines, 2), "Greeting Scene");
/// // A header line owns itself.
/// assert_eq!(resolve_passage(&lines, 0), "Greeting Scene");
/// // The widget tag is stripped from the name.
/// assert_eq!(resolve_passage(&lines, 4), "Hints");
/// // Out-of-range indices are tolerated.
/// assert_eq!(resolve_passage(&lines, 99), "Hints");
///
/// let headerless = vec!["just text"];
/// assert_eq!(resolve_passage(&headerless, 0), UNKNOWN_PASSAGE);
/// ```
pub fn resolve_passage<S: AsRef<str>>(lines: &[S], line_index: usize) -> String {
    for i in (0..=line_index).rev() {
        if i >= lines.len() {
            continue;
        }
        let line = lines[i].as_ref();
        if let Some(rest) = line.strip_prefix(PASSAGE_MARKER) {
            let name = rest.trim().replacen(WIDGET_TAG, "", 1);
            return name.trim().to_string();
        }
    }
    UNKNOWN_PASSAGE.to_string()
}

/// Splits a `status<TAB>path` change list into new and modified paths.
///
/// One line per change, as printed by
/// `git diff-tree --no-commit-id --name-status -r <commit>`:
///
/// - `D` (deleted): dropped entirely;
/// - `A` (added): new path;
/// - `M` or `R` (modified/renamed, rename scores like `R100` included):
///   modified path. A rename contributes only its *new* path (the last
///   field); the old path is discarded and any diff is taken against the new
///   path's own history.
/// - blank lines and unrecognized status codes are ignored.
///
/// # Example
///
/// ```
/// use commit2mod::classify_changes;
///
/// let listing = "D\ta.js\nA\tb.twee\nM\tc.twee\nR100\told.js\tnew.js\n";
/// let changes = classify_changes(listing);
/// assert_eq!(changes.new_paths, vec!["b.twee"]);
/// assert_eq!(changes.modified_paths, vec!["c.twee", "new.js"]);
/// ```
pub fn classify_changes(name_status: &str) -> ChangeSet {
    let mut changes = ChangeSet::default();

    for line in name_status.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let Some(status) = fields.next() else {
            continue;
        };
        // For renames git prints `R<score> TAB old TAB new`; the new path is
        // the last field. For A/M/D lines the only path is the last field.
        let Some(path) = fields.last() else {
            continue;
        };
        if path.is_empty() {
            continue;
        }

        match status {
            "D" => {
                debug!("  Ignoring deleted file '{}'", path);
            }
            "A" => changes.new_paths.push(path.to_string()),
            s if s == "M" || s.starts_with('R') => {
                changes.modified_paths.push(path.to_string());
            }
            other => {
                debug!("  Ignoring change '{}' with status '{}'", path, other);
            }
        }
    }

    changes
}

/// Runs the whole extraction pipeline for one modified `.twee` file.
///
/// `diff` is the file's unified diff (parent vs. commit); `content` is the
/// full file text at the commit, used to attribute each hunk to its
/// enclosing passage via the hunk's old starting line. Hunks without changes
/// contribute nothing.
///
/// # Errors
///
/// Propagates [`ParseError`] from the hunk parser.
///
/// # Example
///
/// ```
/// use commit2mod::passage_patches_from_diff;
///
/// let diff = "\
/// @@ -2,2 +2,3 @@
///  Alice said hello.
/// +Bob waved back.
///  The sun set.
/// ";
/// let content = ":: Greeting Scene\nAlice said hello.\nThe sun set.\n";
/// let ops = passage_patches_from_diff(diff, content).unwrap();
/// assert_eq!(ops.len(), 1);
/// assert_eq!(ops[0].passage, "Greeting Scene");
/// assert_eq!(ops[0].find, "Alice said hello.");
/// assert_eq!(ops[0].replace, "Alice said hello.\nBob waved back.");
/// ```
pub fn passage_patches_from_diff(
    diff: &str,
    content: &str,
) -> Result<Vec<PassagePatch>, ParseError> {
    let hunks = parse_hunks(diff)?;
    let lines: Vec<&str> = content.lines().collect();
    let mut patches = Vec::new();

    for hunk in &hunks {
        let classified = classify_hunk(hunk, ContextMode::Passage);
        if let Some((find, replace)) = classified.replacement() {
            let passage = resolve_passage(&lines, hunk.old_start);
            trace!(
                "  Hunk at old line {} attributed to passage '{}'",
                hunk.old_start,
                passage
            );
            patches.push(PassagePatch {
                passage,
                find,
                replace,
            });
        } else {
            debug!("  Skipping hunk at old line {} (no changes)", hunk.old_start);
        }
    }

    Ok(patches)
}

/// Runs the whole extraction pipeline for one modified `.js` file.
///
/// `file_name` is the base name recorded in each resulting patch. Hunks
/// without changes contribute nothing.
///
/// # Errors
///
/// Propagates [`ParseError`] from the hunk parser.
///
/// # Example
///
/// ```
/// use commit2mod::script_patches_from_diff;
///
/// let diff = "\
/// @@ -1,3 +1,3 @@
///  function greet() {
/// -  oldCall();
/// +  newCall();
///  }
/// ";
/// let ops = script_patches_from_diff(diff, "script.js").unwrap();
/// assert_eq!(ops.len(), 1);
/// assert_eq!(ops[0].from, "function greet() {\n  oldCall();");
/// assert_eq!(ops[0].to, "function greet() {\n  newCall();");
/// assert_eq!(ops[0].file_name, "script.js");
/// ```
pub fn script_patches_from_diff(
    diff: &str,
    file_name: &str,
) -> Result<Vec<ScriptPatch>, ParseError> {
    let hunks = parse_hunks(diff)?;
    let mut patches = Vec::new();

    for hunk in &hunks {
        let classified = classify_hunk(hunk, ContextMode::Script);
        if let Some((from, to)) = classified.replacement() {
            patches.push(ScriptPatch {
                from,
                to,
                file_name: file_name.to_string(),
            });
        } else {
            debug!("  Skipping hunk at old line {} (no changes)", hunk.old_start);
        }
    }

    Ok(patches)
}

// --- Git Collaborator ---

/// Runs one git command in `repo` and returns its stdout bytes.
fn run_git(repo: &Path, args: &[&str]) -> Result<Vec<u8>, GitError> {
    trace!("  Running git {}", args.join(" "));
    let output = Command::new("git")
        .current_dir(repo)
        .args(args)
        .output()
        .map_err(|source| GitError::Launch { source })?;

    if !output.status.success() {
        return Err(GitError::CommandFailed {
            args: args.join(" "),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

/// Runs one git command and returns its stdout as (lossy) text.
fn run_git_text(repo: &Path, args: &[&str]) -> Result<String, GitError> {
    let stdout = run_git(repo, args)?;
    Ok(String::from_utf8_lossy(&stdout).into_owned())
}

/// Resolves the repository's current HEAD commit id.
///
/// # Errors
///
/// Fails when `repo` is not a git repository or has no commits. Callers
/// treat this as fatal: without a resolvable commit there is nothing to
/// package.
pub fn resolve_head_commit(repo: &Path) -> Result<String, GitError> {
    let out = run_git_text(repo, &["rev-parse", "HEAD"])?;
    Ok(out.trim().to_string())
}

/// Returns the raw `status<TAB>path` change list for one commit.
///
/// Output lines are in the order git reports them; feed the result to
/// [`classify_changes`].
pub fn list_changed_paths(repo: &Path, commit: &str) -> Result<String, GitError> {
    run_git_text(
        repo,
        &["diff-tree", "--no-commit-id", "--name-status", "-r", commit],
    )
}

/// Returns the verbatim bytes of `path` as stored at `commit`.
pub fn file_at_commit(repo: &Path, commit: &str, path: &str) -> Result<Vec<u8>, GitError> {
    run_git(repo, &["show", &format!("{}:{}", commit, path)])
}

/// Returns the text content of `path` as stored at `commit`.
///
/// Used as the passage-resolution input; invalid UTF-8 is replaced rather
/// than rejected.
pub fn text_at_commit(repo: &Path, commit: &str, path: &str) -> Result<String, GitError> {
    let bytes = file_at_commit(repo, commit, path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Returns the unified diff of `path` between `commit`'s parent and `commit`.
pub fn diff_for_path(repo: &Path, commit: &str, path: &str) -> Result<String, GitError> {
    let parent = format!("{}~1", commit);
    run_git_text(repo, &["diff", &parent, commit, "--", path])
}

// --- Orchestration ---

/// Extracts everything the packager needs from one commit.
///
/// Lists the commit's changes, then runs the per-file pipeline for every
/// modified `.twee` and `.js` path. Each file is processed independently:
/// retrieval or parse failures are logged with the offending path and the
/// file is skipped. Output ordering follows the change list, then hunk order
/// within each file.
///
/// Modified files that are neither `.twee` nor `.js` are ignored.
///
/// # Errors
///
/// Fails only when the change list itself cannot be retrieved.
pub fn extract_commit_patches(repo: &Path, commit: &str) -> Result<CommitPatches, GitError> {
    let listing = list_changed_paths(repo, commit)?;
    let changes = classify_changes(&listing);
    info!(
        "Commit {} has {} new and {} modified file(s)",
        commit,
        changes.new_paths.len(),
        changes.modified_paths.len()
    );

    let mut patches = CommitPatches {
        new_files: changes.new_paths,
        ..Default::default()
    };

    for path in &changes.modified_paths {
        if path.ends_with(".twee") {
            match extract_passage_file(repo, commit, path) {
                Ok(mut ops) => {
                    debug!("  {} patch(es) from '{}'", ops.len(), path);
                    patches.passage_patches.append(&mut ops);
                }
                Err(e) => warn!("Skipping modified file '{}': {}", path, e),
            }
        } else if path.ends_with(".js") {
            match extract_script_file(repo, commit, path) {
                Ok(mut ops) => {
                    debug!("  {} patch(es) from '{}'", ops.len(), path);
                    patches.script_patches.append(&mut ops);
                }
                Err(e) => warn!("Skipping modified file '{}': {}", path, e),
            }
        } else {
            debug!("  Ignoring modified file '{}' (not .twee or .js)", path);
        }
    }

    Ok(patches)
}

/// Fetches diff and content for one `.twee` file and extracts its patches.
///
/// The file content is fetched once and treated as immutable for the file's
/// duration; every hunk resolves its passage against the same snapshot.
fn extract_passage_file(
    repo: &Path,
    commit: &str,
    path: &str,
) -> Result<Vec<PassagePatch>, ExtractError> {
    let diff = diff_for_path(repo, commit, path)?;
    let content = text_at_commit(repo, commit, path)?;
    Ok(passage_patches_from_diff(&diff, &content)?)
}

/// Fetches the diff for one `.js` file and extracts its patches.
fn extract_script_file(
    repo: &Path,
    commit: &str,
    path: &str,
) -> Result<Vec<ScriptPatch>, ExtractError> {
    let diff = diff_for_path(repo, commit, path)?;
    let file_name = Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string());
    Ok(script_patches_from_diff(&diff, &file_name)?)
}

// --- Manifest ---

/// The `boot.json` manifest consumed by the modding host.
///
/// Field spelling follows the host's schema exactly, including the
/// snake/camel mix of `scriptFileList_inject_early`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootManifest {
    pub name: String,
    pub version: String,
    #[serde(rename = "styleFileList")]
    pub style_file_list: Vec<String>,
    #[serde(rename = "scriptFileList_inject_early")]
    pub script_file_list_inject_early: Vec<String>,
    #[serde(rename = "scriptFileList")]
    pub script_file_list: Vec<String>,
    #[serde(rename = "tweeFileList")]
    pub twee_file_list: Vec<String>,
    #[serde(rename = "imgFileList")]
    pub img_file_list: Vec<String>,
    #[serde(rename = "additionFile")]
    pub addition_file: Vec<String>,
    #[serde(rename = "addonPlugin")]
    pub addon_plugins: Vec<AddonPlugin>,
    #[serde(rename = "dependenceInfo")]
    pub dependence_info: Vec<DependenceInfo>,
}

/// One addon plugin entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddonPlugin {
    #[serde(rename = "modName")]
    pub mod_name: String,
    #[serde(rename = "addonName")]
    pub addon_name: String,
    #[serde(rename = "modVersion")]
    pub mod_version: String,
    pub params: AddonParams,
}

/// Addon parameter payloads; the two addons use different shapes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AddonParams {
    /// `TweeReplacer` takes a flat list of passage patches.
    Passage(Vec<PassagePatch>),
    /// `ReplacePatcher` groups script patches under a `js` key.
    Script(ScriptParams),
}

/// The `ReplacePatcher` parameter envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptParams {
    pub js: Vec<ScriptPatch>,
}

/// One declared mod dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependenceInfo {
    #[serde(rename = "modName")]
    pub mod_name: String,
    pub version: String,
}

/// Builds the `boot.json` manifest for one extracted commit.
///
/// `tweeFileList` is the deduplicated set of newly added `.twee` paths, in
/// first-seen order: each path appears at most once even if the upstream
/// change list reports it more than once. A `TweeReplacer` addon entry is
/// always present; a `ReplacePatcher` entry (and its dependency declaration)
/// is added only when script patches exist.
///
/// # Example
///
/// ```
/// use commit2mod::{build_manifest, CommitPatches};
///
/// let patches = CommitPatches {
///     new_files: vec![
///         "scenes/a.twee".to_string(),
///         "img/logo.png".to_string(),
///         "scenes/a.twee".to_string(),
///     ],
///     passage_patches: vec![],
///     script_patches: vec![],
/// };
/// let manifest = build_manifest("newmod", "1", &patches);
/// assert_eq!(manifest.twee_file_list, vec!["scenes/a.twee"]);
/// assert_eq!(manifest.addon_plugins.len(), 1);
/// assert_eq!(manifest.dependence_info.len(), 1);
/// ```
pub fn build_manifest(name: &str, version: &str, patches: &CommitPatches) -> BootManifest {
    let mut twee_file_list: Vec<String> = Vec::new();
    for path in &patches.new_files {
        if path.ends_with(".twee") && !twee_file_list.iter().any(|p| p == path) {
            twee_file_list.push(path.clone());
        }
    }

    let mut addon_plugins = vec![AddonPlugin {
        mod_name: "TweeReplacer".to_string(),
        addon_name: "TweeReplacerAddon".to_string(),
        mod_version: "1.0.0".to_string(),
        params: AddonParams::Passage(patches.passage_patches.clone()),
    }];
    let mut dependence_info = vec![DependenceInfo {
        mod_name: "TweeReplacer".to_string(),
        version: "^1.0.0".to_string(),
    }];

    if !patches.script_patches.is_empty() {
        addon_plugins.push(AddonPlugin {
            mod_name: "ReplacePatcher".to_string(),
            addon_name: "ReplacePatcherAddon".to_string(),
            mod_version: "^1.0.0".to_string(),
            params: AddonParams::Script(ScriptParams {
                js: patches.script_patches.clone(),
            }),
        });
        dependence_info.push(DependenceInfo {
            mod_name: "ReplacePatcher".to_string(),
            version: ">=1.0.0".to_string(),
        });
    }

    BootManifest {
        name: name.to_string(),
        version: version.to_string(),
        style_file_list: Vec::new(),
        script_file_list_inject_early: Vec::new(),
        script_file_list: Vec::new(),
        twee_file_list,
        img_file_list: Vec::new(),
        addition_file: Vec::new(),
        addon_plugins,
        dependence_info,
    }
}

// --- Package Assembly ---

/// Converts a `std::io::Error` into a `PackageError` carrying the path.
fn map_io_error(path: PathBuf, source: std::io::Error) -> PackageError {
    PackageError::Io { path, source }
}

/// Rejects change-list paths that would escape the package directory.
fn ensure_relative(path: &str) -> Result<&Path, PackageError> {
    let rel = Path::new(path);
    let escapes = rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
    if escapes {
        return Err(PackageError::UnsafePath(rel.to_path_buf()));
    }
    Ok(rel)
}

/// Creates a fresh package directory `<output_dir>/<mod_name>`.
///
/// The output directory is created if missing; a pre-existing package
/// directory of the same name is wiped. An empty `game/` subdirectory is
/// created for host compatibility.
pub fn prepare_mod_dir(output_dir: &Path, mod_name: &str) -> Result<PathBuf, PackageError> {
    fs::create_dir_all(output_dir).map_err(|e| map_io_error(output_dir.to_path_buf(), e))?;

    let mod_dir = output_dir.join(mod_name);
    if mod_dir.exists() {
        debug!("Removing stale package directory '{}'", mod_dir.display());
        fs::remove_dir_all(&mod_dir).map_err(|e| map_io_error(mod_dir.clone(), e))?;
    }
    let game_dir = mod_dir.join("game");
    fs::create_dir_all(&game_dir).map_err(|e| map_io_error(game_dir, e))?;
    Ok(mod_dir)
}

/// Writes one new file into the package at its repo-relative path.
pub fn write_package_file(
    mod_dir: &Path,
    rel_path: &str,
    bytes: &[u8],
) -> Result<(), PackageError> {
    let rel = ensure_relative(rel_path)?;
    let dest = mod_dir.join(rel);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| map_io_error(parent.to_path_buf(), e))?;
    }
    fs::write(&dest, bytes).map_err(|e| map_io_error(dest, e))
}

/// Serializes the manifest to `<mod_dir>/boot.json`.
pub fn write_manifest(mod_dir: &Path, manifest: &BootManifest) -> Result<(), PackageError> {
    let json = serde_json::to_string_pretty(manifest)?;
    let dest = mod_dir.join("boot.json");
    fs::write(&dest, json).map_err(|e| map_io_error(dest, e))
}

/// Bundles the listed package files into `DoL-<name>-<version>.zip`.
///
/// `files` are package-relative paths (forward-slash separated, as reported
/// by git). A pre-existing archive of the same name is replaced. Returns the
/// path of the written archive.
pub fn bundle_zip(
    output_dir: &Path,
    mod_dir: &Path,
    mod_name: &str,
    mod_version: &str,
    files: &[String],
) -> Result<PathBuf, PackageError> {
    let zip_path = output_dir.join(format!("DoL-{}-{}.zip", mod_name, mod_version));
    if zip_path.exists() {
        fs::remove_file(&zip_path).map_err(|e| map_io_error(zip_path.clone(), e))?;
    }

    let file = File::create(&zip_path).map_err(|e| map_io_error(zip_path.clone(), e))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for rel in files {
        let source = mod_dir.join(ensure_relative(rel)?);
        let bytes = fs::read(&source).map_err(|e| map_io_error(source.clone(), e))?;
        writer.start_file(rel.as_str(), options)?;
        writer
            .write_all(&bytes)
            .map_err(|e| map_io_error(zip_path.clone(), e))?;
    }

    writer.finish()?;
    Ok(zip_path)
}

// --- Full Run ---

/// Options for one full packaging run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Git repository to read from.
    pub repo: PathBuf,
    /// The commit to package (already resolved; see [`resolve_head_commit`]).
    pub commit: String,
    /// Mod name, used for the package directory and manifest.
    pub name: String,
    /// Mod version string, used for the manifest and the zip name.
    pub version: String,
    /// Directory that receives the package directory and the zip.
    pub output_dir: PathBuf,
}

/// What a full packaging run produced.
#[derive(Debug)]
pub struct BuildReport {
    /// The assembled package directory.
    pub mod_dir: PathBuf,
    /// The bundled zip archive.
    pub zip_path: PathBuf,
    /// Count of new files copied into the package.
    pub new_file_count: usize,
    /// Count of passage patches recorded in the manifest.
    pub passage_patch_count: usize,
    /// Count of script patches recorded in the manifest.
    pub script_patch_count: usize,
}

/// Runs the whole pipeline: extract, assemble, serialize, bundle.
///
/// New files that git cannot reproduce are logged and skipped, matching the
/// per-file policy of the extraction stage; such files also stay out of the
/// archive.
///
/// # Errors
///
/// Fails when the change list cannot be retrieved or the package cannot be
/// written.
pub fn build_mod(options: &BuildOptions) -> Result<BuildReport, BuildError> {
    info!(
        "Packaging commit {} as mod '{}' v{}",
        options.commit, options.name, options.version
    );
    let patches = extract_commit_patches(&options.repo, &options.commit)?;
    let mod_dir = prepare_mod_dir(&options.output_dir, &options.name)?;

    let mut written: Vec<String> = Vec::new();
    for path in &patches.new_files {
        if written.iter().any(|w| w == path) {
            continue;
        }
        match file_at_commit(&options.repo, &options.commit, path) {
            Ok(bytes) => {
                write_package_file(&mod_dir, path, &bytes)?;
                info!("  Copied new file '{}'", path);
                written.push(path.clone());
            }
            Err(e) => warn!("Failed to copy new file '{}': {}", path, e),
        }
    }
    let new_file_count = written.len();

    let manifest = build_manifest(&options.name, &options.version, &patches);
    write_manifest(&mod_dir, &manifest)?;
    written.push("boot.json".to_string());

    let zip_path = bundle_zip(
        &options.output_dir,
        &mod_dir,
        &options.name,
        &options.version,
        &written,
    )?;
    info!("Bundled package into '{}'", zip_path.display());

    Ok(BuildReport {
        mod_dir,
        zip_path,
        new_file_count,
        passage_patch_count: patches.passage_patches.len(),
        script_patch_count: patches.script_patches.len(),
    })
}
