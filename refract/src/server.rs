//! The tower-lsp surface: initialization, text synchronization, and the
//! hover / definition handlers backed by the analysis core.

use std::sync::{Arc, RwLock};

use refract_core::vfs::OsVfs;
use refract_core::{Analyzer, CacheError, DefinitionLink, Pos, Settings, Span, Workspace};
use tower_lsp::jsonrpc;
use tower_lsp::lsp_types::{
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    GotoDefinitionParams, GotoDefinitionResponse, Hover, HoverContents, HoverParams,
    HoverProviderCapability, InitializeParams, InitializeResult, InitializedParams, LocationLink,
    MarkupContent, MarkupKind, MessageType, OneOf, Position, Range, ServerCapabilities,
    ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind,
};
use tower_lsp::{Client, LanguageServer};
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, Registry, reload};
use url::Url;

use crate::render::hover_markdown;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

pub struct Backend {
    client: Client,
    analyzer: RwLock<Option<Arc<Analyzer>>>,
    filter: FilterHandle,
}

impl Backend {
    pub fn new(client: Client, filter: FilterHandle) -> Self {
        Self {
            client,
            analyzer: RwLock::new(None),
            filter,
        }
    }

    fn analyzer(&self) -> Option<Arc<Analyzer>> {
        self.analyzer.read().unwrap().clone()
    }

    /// The current text of an open document, from the analyzer overlay.
    fn open_text(&self, uri: &Url) -> Option<String> {
        self.analyzer()?.overlay(uri)
    }
}

/// Decodes the `openapi-lsp` settings block from initialization options.
/// Options may carry the block under its section name or stand alone.
fn decode_settings(options: Option<serde_json::Value>) -> Settings {
    let Some(options) = options else {
        return Settings::default();
    };
    let section = options.get("openapi-lsp").cloned().unwrap_or(options);
    match serde_json::from_value(section) {
        Ok(settings) => settings,
        Err(error) => {
            error!(%error, "invalid initialization options; using defaults");
            Settings::default()
        }
    }
}

fn log_query_failure(kind: &str, uri: &Url, error: &CacheError) {
    error!(target: "refract::server", %uri, %error, "{kind} failed");
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> jsonrpc::Result<InitializeResult> {
        let mut folders: Vec<Url> = params
            .workspace_folders
            .unwrap_or_default()
            .into_iter()
            .map(|folder| folder.uri)
            .collect();
        #[allow(deprecated)]
        if folders.is_empty()
            && let Some(root) = params.root_uri
        {
            folders.push(root);
        }

        let settings = decode_settings(params.initialization_options);
        if settings.debug.cache {
            let _ = self
                .filter
                .reload(EnvFilter::new("info,refract_core=debug,refract=debug"));
        }

        let workspace = Workspace::new(folders.clone(), settings).map_err(|error| {
            error!(%error, "workspace configuration rejected");
            jsonrpc::Error::invalid_params(error.to_string())
        })?;
        let vfs = Arc::new(OsVfs::new(folders));
        let analyzer = Arc::new(Analyzer::new(vfs, workspace));
        *self.analyzer.write().unwrap() = Some(analyzer);

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Kind(
                    TextDocumentSyncKind::INCREMENTAL,
                )),
                hover_provider: Some(HoverProviderCapability::Simple(true)),
                definition_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: "refract".to_owned(),
                version: Some(env!("CARGO_PKG_VERSION").to_owned()),
            }),
        })
    }

    async fn initialized(&self, _params: InitializedParams) {
        info!("refract initialized");
        self.client
            .log_message(MessageType::INFO, "refract ready")
            .await;
    }

    async fn shutdown(&self) -> jsonrpc::Result<()> {
        if let Some(analyzer) = self.analyzer() {
            analyzer.shutdown();
        }
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let Some(analyzer) = self.analyzer() else {
            return;
        };
        let uri = params.text_document.uri;
        debug!(target: "refract::server", %uri, "did_open");
        analyzer.open_document(&uri, params.text_document.text);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Some(analyzer) = self.analyzer() else {
            return;
        };
        let uri = params.text_document.uri;
        let mut text = analyzer.overlay(&uri).unwrap_or_default();
        for change in params.content_changes {
            text = apply_change(&text, change.range, &change.text);
        }
        analyzer.change_document(&uri, text);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let Some(analyzer) = self.analyzer() else {
            return;
        };
        analyzer.close_document(&params.text_document.uri);
    }

    async fn hover(&self, params: HoverParams) -> jsonrpc::Result<Option<Hover>> {
        let Some(analyzer) = self.analyzer() else {
            return Ok(None);
        };
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let text = self.open_text(&uri).unwrap_or_default();
        let pos = position_to_pos(&text, position);

        match analyzer.hover(&uri, pos).await {
            Ok(Some(payload)) => Ok(Some(Hover {
                contents: HoverContents::Markup(MarkupContent {
                    kind: MarkupKind::Markdown,
                    value: hover_markdown(&payload),
                }),
                range: None,
            })),
            Ok(None) => Ok(None),
            Err(error) => {
                log_query_failure("hover", &uri, &error);
                Ok(None)
            }
        }
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> jsonrpc::Result<Option<GotoDefinitionResponse>> {
        let Some(analyzer) = self.analyzer() else {
            return Ok(None);
        };
        let uri = params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        let text = self.open_text(&uri).unwrap_or_default();
        let pos = position_to_pos(&text, position);

        let link = match analyzer.goto_definition(&uri, pos).await {
            Ok(Some(link)) => link,
            Ok(None) => return Ok(None),
            Err(error) => {
                log_query_failure("definition", &uri, &error);
                return Ok(None);
            }
        };

        // Span columns count characters; the target document's text is
        // needed to widen them back out to UTF-16 positions.
        let target_text = match self.open_text(&link.target_uri) {
            Some(text) => text,
            None => match link.target_uri.to_file_path() {
                Ok(path) => tokio::fs::read_to_string(path).await.unwrap_or_default(),
                Err(_) => String::new(),
            },
        };
        let location = to_location_link(&link, &text, &target_text);
        Ok(Some(GotoDefinitionResponse::Link(vec![location])))
    }
}

fn to_location_link(link: &DefinitionLink, source_text: &str, target_text: &str) -> LocationLink {
    LocationLink {
        origin_selection_range: link
            .origin_span
            .map(|span| span_to_range(source_text, span)),
        target_uri: link.target_uri.clone(),
        target_range: span_to_range(target_text, link.target_span),
        target_selection_range: span_to_range(target_text, link.target_selection_span),
    }
}

/// Converts a UTF-16 LSP position to a character-counted position.
fn position_to_pos(text: &str, position: Position) -> Pos {
    let Some(line) = text.lines().nth(position.line as usize) else {
        return Pos::new(position.line, position.character);
    };
    let mut utf16 = 0usize;
    let mut chars = 0u32;
    for ch in line.chars() {
        if utf16 >= position.character as usize {
            break;
        }
        utf16 += ch.len_utf16();
        chars += 1;
    }
    Pos::new(position.line, chars)
}

/// Converts a character-counted position back to a UTF-16 LSP position.
fn pos_to_position(text: &str, pos: Pos) -> Position {
    let Some(line) = text.lines().nth(pos.line as usize) else {
        return Position::new(pos.line, pos.col);
    };
    let utf16: usize = line
        .chars()
        .take(pos.col as usize)
        .map(char::len_utf16)
        .sum();
    Position::new(pos.line, utf16 as u32)
}

fn span_to_range(text: &str, span: Span) -> Range {
    Range {
        start: pos_to_position(text, span.start),
        end: pos_to_position(text, span.end),
    }
}

/// Applies one incremental content change. A missing range replaces the
/// whole document.
fn apply_change(text: &str, range: Option<Range>, new_text: &str) -> String {
    let Some(range) = range else {
        return new_text.to_owned();
    };
    let start = byte_offset(text, range.start);
    let end = byte_offset(text, range.end).max(start);
    let mut out = String::with_capacity(text.len() - (end - start) + new_text.len());
    out.push_str(&text[..start]);
    out.push_str(new_text);
    out.push_str(&text[end..]);
    out
}

/// The byte offset of a UTF-16 LSP position.
fn byte_offset(text: &str, position: Position) -> usize {
    let mut offset = 0usize;
    for (index, line) in text.split_inclusive('\n').enumerate() {
        if index == position.line as usize {
            let mut utf16 = 0usize;
            for (byte_index, ch) in line.char_indices() {
                if utf16 >= position.character as usize {
                    return offset + byte_index;
                }
                utf16 += ch.len_utf16();
            }
            return offset + line.len();
        }
        offset += line.len();
    }
    text.len()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn range(start: (u32, u32), end: (u32, u32)) -> Option<Range> {
        Some(Range {
            start: Position::new(start.0, start.1),
            end: Position::new(end.0, end.1),
        })
    }

    #[test]
    fn test_apply_change_full_replace() {
        assert_eq!(apply_change("old", None, "new"), "new");
    }

    #[test]
    fn test_apply_change_in_line() {
        let text = "openapi: 3.0.3\ninfo:\n  title: T\n";
        let edited = apply_change(text, range((2, 9), (2, 10)), "Petstore");
        assert_eq!(edited, "openapi: 3.0.3\ninfo:\n  title: Petstore\n");
    }

    #[test]
    fn test_apply_change_across_lines() {
        let text = "a: 1\nb: 2\nc: 3\n";
        let edited = apply_change(text, range((0, 4), (1, 4)), "");
        assert_eq!(edited, "a: 1\nc: 3\n");
    }

    #[test]
    fn test_apply_change_insertion_at_end() {
        let text = "a: 1\n";
        let edited = apply_change(text, range((1, 0), (1, 0)), "b: 2\n");
        assert_eq!(edited, "a: 1\nb: 2\n");
    }

    #[test]
    fn test_position_conversion_counts_utf16() {
        // The emoji is two UTF-16 units but one character.
        let text = "x: \"🦀 crab\"\n";
        let pos = position_to_pos(text, Position::new(0, 7));
        assert_eq!(pos, Pos::new(0, 6));
        assert_eq!(pos_to_position(text, pos), Position::new(0, 7));
    }

    #[test]
    fn test_position_conversion_is_identity_for_ascii() {
        let text = "info:\n  title: T\n";
        for (line, col) in [(0, 0), (0, 5), (1, 8)] {
            let pos = position_to_pos(text, Position::new(line, col));
            assert_eq!(pos, Pos::new(line, col));
        }
    }

    #[test]
    fn test_decode_settings_with_and_without_section() {
        let nested = decode_settings(Some(serde_json::json!({
            "openapi-lsp": { "discoverRoots": { "pattern": "api/**" } }
        })));
        assert_eq!(nested.discover_roots.pattern, "api/**");

        let flat = decode_settings(Some(serde_json::json!({
            "discoverRoots": { "pattern": "specs/**" }
        })));
        assert_eq!(flat.discover_roots.pattern, "specs/**");

        assert_eq!(decode_settings(None).discover_roots.pattern, "**/*");
    }
}
