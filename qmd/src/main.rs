//! QMD - Query Markdown Documents
//!
//! A full-text and semantic search CLI for markdown files.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use qmd::cli::{
    Cli, CollectionCommands, Commands, ContextCommands, DbCommands, ModelCommands, OutputFormat,
};
use qmd::formatter::{
    add_line_numbers, format_bytes, format_documents, format_ls_time, format_search_results,
    format_time_ago,
};
use qmd::llm::{Cursor, Progress, format_eta, render_progress_bar};
use qmd::store::{
    Store, find_similar_files, is_docid, is_virtual_path, match_files_by_glob, parse_virtual_path,
};
use qmd::{HybridOptions, Ollama, SearchEngine, SearchOptions, embed_documents, index_files};
use std::fs;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Collection(cmd) => handle_collection(cmd),
        Commands::Context(cmd) => handle_context(cmd),
        Commands::Ls { path } => handle_ls(path),
        Commands::Get {
            file,
            from_line,
            max_lines,
            line_numbers,
        } => handle_get(&file, from_line, max_lines, line_numbers),
        Commands::MultiGet {
            pattern,
            max_lines,
            max_bytes,
            format,
        } => handle_multi_get(&pattern, max_lines, max_bytes, &format),
        Commands::Status => handle_status(),
        Commands::Update => handle_update(),
        Commands::Search {
            query,
            collection,
            limit,
            min_score,
            full,
            format,
        } => handle_search(&query, collection, limit, min_score, full, &format),
        Commands::Vsearch {
            query,
            collection,
            limit,
            min_score,
            full,
            format,
            model,
        } => handle_vsearch(
            &query,
            collection,
            limit,
            min_score,
            full,
            &format,
            model.as_deref(),
        ),
        Commands::Query {
            query,
            collection,
            limit,
            min_score,
            full,
            no_expand,
            no_rerank,
            format,
        } => handle_query(
            &query, collection, limit, min_score, full, no_expand, no_rerank, &format,
        ),
        Commands::Expand { query } => handle_expand(&query),
        Commands::Embed { force, model } => handle_embed(force, model.as_deref()),
        Commands::Models(cmd) => handle_models(cmd),
        Commands::Db(cmd) => handle_db(cmd),
        Commands::Cleanup => handle_cleanup(),
    }
}

/// Resolve a user-supplied reference to `(collection, path)`.
///
/// Accepts `#docid`, `qmd://collection/path`, and `collection/path`.
fn resolve_reference(store: &Store, input: &str) -> Result<(String, String)> {
    if is_docid(input) {
        return store
            .find_document_by_docid(input)?
            .ok_or_else(|| anyhow::anyhow!("Document not found: {input}"));
    }
    if is_virtual_path(input) {
        return parse_virtual_path(input)
            .ok_or_else(|| anyhow::anyhow!("Invalid virtual path: {input}"));
    }
    let parts: Vec<&str> = input.splitn(2, '/').collect();
    if parts.len() == 2 {
        return Ok((parts[0].to_string(), parts[1].to_string()));
    }
    Err(anyhow::anyhow!(
        "Could not resolve path: {input}. Use qmd://collection/path format."
    ))
}

/// Print similar paths under a not-found error.
fn print_similar(store: &Store, input: &str) {
    if let Ok(similar) = find_similar_files(store, input)
        && !similar.is_empty()
    {
        eprintln!("\n{}", "Similar files:".dimmed());
        for path in similar {
            eprintln!("  {path}");
        }
    }
}

/// Handle collection subcommands.
fn handle_collection(cmd: CollectionCommands) -> Result<()> {
    match cmd {
        CollectionCommands::Add { path, name, mask } => {
            let abs_path = fs::canonicalize(&path)?;
            let abs_path_str = abs_path.to_string_lossy().to_string();
            let store = Store::new()?;

            // An explicit name is reserved first; indexing then finds the
            // collection by its (pwd, glob) key.
            if let Some(ref coll_name) = name {
                if store.get_collection(coll_name)?.is_some() {
                    eprintln!(
                        "{} Collection '{}' already exists.",
                        "Error:".red(),
                        coll_name
                    );
                    eprintln!("Use a different name with --name <name>");
                    std::process::exit(1);
                }
                store.create_collection(
                    coll_name,
                    &abs_path_str,
                    &mask,
                    &chrono::Utc::now().to_rfc3339(),
                )?;
            }

            println!("Indexing {abs_path_str} ({mask})...");
            let result = run_index(&store, &abs_path_str, &mask)?;
            println!(
                "{} Collection '{}' ready: {} indexed, {} updated, {} unchanged, {} removed",
                "✓".green(),
                result.collection,
                result.indexed,
                result.updated,
                result.unchanged,
                result.removed
            );
        }
        CollectionCommands::List => {
            let store = Store::new()?;
            let collections = store.list_collections()?;

            if collections.is_empty() {
                println!("No collections found. Run 'qmd collection add .' to create one.");
                return Ok(());
            }

            println!("{}\n", "Collections:".bold());
            for coll in &collections {
                let time_ago = coll
                    .last_modified
                    .as_ref()
                    .map_or_else(|| "never".to_string(), |t| format_time_ago(t));

                println!(
                    "{} {}",
                    coll.name.cyan(),
                    format!("(qmd://{}/)", coll.name).dimmed()
                );
                println!("  {} {}", "Path:".dimmed(), coll.pwd);
                println!("  {} {}", "Pattern:".dimmed(), coll.glob_pattern);
                println!("  {} {}", "Files:".dimmed(), coll.active_count);
                println!("  {} {}", "Updated:".dimmed(), time_ago);
                println!();
            }
        }
        CollectionCommands::Remove { name } => {
            let store = Store::new()?;
            match store.remove_collection(&name) {
                Ok((deleted_docs, cleaned)) => {
                    println!("{} Removed collection '{}'", "✓".green(), name);
                    println!("  Deleted {deleted_docs} documents");
                    if cleaned > 0 {
                        println!("  Cleaned up {cleaned} orphaned content hashes");
                    }
                }
                Err(e) => {
                    eprintln!("{} {e}", "Error:".red());
                    std::process::exit(1);
                }
            }
        }
        CollectionCommands::Rename { old_name, new_name } => {
            let store = Store::new()?;
            if let Err(e) = store.rename_collection(&old_name, &new_name) {
                eprintln!("{} {e}", "Error:".red());
                std::process::exit(1);
            }
            println!(
                "{} Renamed collection '{}' to '{}'",
                "✓".green(),
                old_name,
                new_name
            );
        }
    }
    Ok(())
}

/// Index with a single-line progress display.
fn run_index(store: &Store, pwd: &str, mask: &str) -> Result<qmd::IndexResult> {
    use std::io::Write;

    let mut cb = |current: usize, total: usize, path: &str| {
        eprint!("\r  [{current}/{total}] {path:<60.60}");
        std::io::stderr().flush().ok();
    };
    let result = index_files(store, pwd, mask, Some(&mut cb))?;
    eprint!("\r{:<76}\r", "");
    Ok(result)
}

/// Handle context subcommands.
fn handle_context(cmd: ContextCommands) -> Result<()> {
    match cmd {
        ContextCommands::Add { path, text } => {
            let store = Store::new()?;
            let path_arg = path.as_deref().unwrap_or(".");
            let now = chrono::Utc::now().to_rfc3339();

            // Virtual paths name the collection directly.
            if is_virtual_path(path_arg) {
                let Some((coll_name, prefix)) = parse_virtual_path(path_arg) else {
                    eprintln!("{} Invalid virtual path: {}", "Error:".red(), path_arg);
                    std::process::exit(1);
                };
                if let Err(e) = store.add_context(&coll_name, &prefix, &text, &now) {
                    eprintln!("{} {e}", "Error:".red());
                    std::process::exit(1);
                }
                let display = if prefix.is_empty() {
                    format!("qmd://{coll_name}/ (collection root)")
                } else {
                    format!("qmd://{coll_name}/{prefix}")
                };
                println!("{} Added context for: {}", "✓".green(), display);
                println!("{}", format!("Context: {text}").dimmed());
                return Ok(());
            }

            // Filesystem path: find the collection whose pwd contains it.
            let abs_path = fs::canonicalize(path_arg)?;
            let abs_path_str = abs_path.to_string_lossy().to_string();

            let mut best_match: Option<(String, String, usize)> = None;
            for coll in store.list_collections()? {
                let under = abs_path_str == coll.pwd
                    || abs_path_str.starts_with(&format!("{}/", coll.pwd));
                if under {
                    let rel = abs_path_str
                        .strip_prefix(&format!("{}/", coll.pwd))
                        .unwrap_or("")
                        .to_string();
                    let better = best_match
                        .as_ref()
                        .is_none_or(|(_, _, len)| coll.pwd.len() > *len);
                    if better {
                        best_match = Some((coll.name.clone(), rel, coll.pwd.len()));
                    }
                }
            }

            let Some((coll_name, rel_path, _)) = best_match else {
                eprintln!(
                    "{} Path is not in any indexed collection: {}",
                    "Error:".red(),
                    abs_path_str
                );
                std::process::exit(1);
            };

            store.add_context(&coll_name, &rel_path, &text, &now)?;
            let display = if rel_path.is_empty() {
                format!("qmd://{coll_name}/")
            } else {
                format!("qmd://{coll_name}/{rel_path}")
            };
            println!("{} Added context for: {}", "✓".green(), display);
            println!("{}", format!("Context: {text}").dimmed());
        }
        ContextCommands::List => {
            let store = Store::new()?;
            let contexts = store.list_all_contexts()?;

            if contexts.is_empty() {
                println!(
                    "{}",
                    "No contexts configured. Use 'qmd context add' to add one.".dimmed()
                );
                return Ok(());
            }

            println!("\n{}\n", "Configured Contexts".bold());
            let mut last_collection = String::new();
            for ctx in &contexts {
                if ctx.collection != last_collection {
                    println!("{}", ctx.collection.cyan());
                    last_collection.clone_from(&ctx.collection);
                }
                let path_display = if ctx.path.is_empty() {
                    "  / (root)".to_string()
                } else {
                    format!("  {}", ctx.path)
                };
                println!("{path_display}");
                println!("    {}", ctx.context.dimmed());
            }
        }
        ContextCommands::Check => {
            let store = Store::new()?;
            let collections = store.list_collections()?;
            let contexts = store.list_all_contexts()?;

            let with_context: std::collections::HashSet<_> =
                contexts.iter().map(|c| c.collection.as_str()).collect();
            let missing: Vec<_> = collections
                .iter()
                .filter(|c| !with_context.contains(c.name.as_str()))
                .collect();

            if missing.is_empty() {
                println!(
                    "\n{} {}\n",
                    "✓".green(),
                    "All collections have context configured".bold()
                );
            } else {
                println!("\n{}\n", "Collections without any context:".yellow());
                for coll in missing {
                    println!("{}", coll.name.cyan());
                    println!(
                        "  {}",
                        format!(
                            "Suggestion: qmd context add qmd://{}/ \"Description of {}\"",
                            coll.name, coll.name
                        )
                        .dimmed()
                    );
                }
            }
        }
        ContextCommands::Rm { path } => {
            let store = Store::new()?;
            if !is_virtual_path(&path) {
                eprintln!(
                    "{} Use virtual path format (qmd://collection/path)",
                    "Error:".red()
                );
                std::process::exit(1);
            }
            let Some((coll_name, prefix)) = parse_virtual_path(&path) else {
                eprintln!("{} Invalid virtual path: {}", "Error:".red(), path);
                std::process::exit(1);
            };
            if !store.remove_context(&coll_name, &prefix)? {
                eprintln!("{} No context found for: {}", "Error:".red(), path);
                std::process::exit(1);
            }
            println!("{} Removed context for: {}", "✓".green(), path);
        }
    }
    Ok(())
}

/// Handle ls command.
fn handle_ls(path: Option<String>) -> Result<()> {
    let store = Store::new()?;

    let Some(path_arg) = path else {
        let collections = store.list_collections()?;
        if collections.is_empty() {
            println!("No collections found. Run 'qmd collection add .' to index files.");
            return Ok(());
        }
        println!("{}\n", "Collections:".bold());
        for coll in collections {
            println!(
                "  {}{}{}  {}",
                "qmd://".dimmed(),
                coll.name.cyan(),
                "/".dimmed(),
                format!("({} files)", coll.active_count).dimmed()
            );
        }
        return Ok(());
    };

    let (coll_name, path_prefix) = if is_virtual_path(&path_arg) {
        parse_virtual_path(&path_arg).unwrap_or_else(|| {
            eprintln!("{} Invalid virtual path: {}", "Error:".red(), path_arg);
            std::process::exit(1);
        })
    } else {
        let parts: Vec<&str> = path_arg.splitn(2, '/').collect();
        (
            parts[0].to_string(),
            parts.get(1).map(ToString::to_string).unwrap_or_default(),
        )
    };

    if store.get_collection(&coll_name)?.is_none() {
        eprintln!("{} Collection not found: {}", "Error:".red(), coll_name);
        eprintln!("Run 'qmd ls' to see available collections.");
        std::process::exit(1);
    }

    let prefix = if path_prefix.is_empty() {
        None
    } else {
        Some(path_prefix.as_str())
    };
    let files = store.list_files(&coll_name, prefix)?;

    if files.is_empty() {
        if prefix.is_some() {
            println!("No files found under qmd://{coll_name}/{path_prefix}");
        } else {
            println!("No files found in collection: {coll_name}");
        }
        return Ok(());
    }

    let max_size = files
        .iter()
        .map(|(_, _, _, size)| format_bytes(*size).len())
        .max()
        .unwrap_or(0);

    for (file_path, _title, modified_at, size) in files {
        let size_str = format!("{:>width$}", format_bytes(size), width = max_size);
        println!(
            "{}  {}  {}{}",
            size_str,
            format_ls_time(&modified_at),
            format!("qmd://{coll_name}/").dimmed(),
            file_path.cyan()
        );
    }

    Ok(())
}

/// Handle get command.
fn handle_get(
    file: &str,
    from_line: Option<usize>,
    max_lines: Option<usize>,
    line_numbers: bool,
) -> Result<()> {
    let store = Store::new()?;

    // Parse :linenum suffix.
    let (input_path, parsed_from_line) = if let Some(pos) = file.rfind(':') {
        let suffix = &file[pos + 1..];
        if let Ok(line) = suffix.parse::<usize>() {
            (&file[..pos], Some(line))
        } else {
            (file, None)
        }
    } else {
        (file, None)
    };
    let from_line = from_line.or(parsed_from_line);

    let (collection, path) = resolve_reference(&store, input_path)?;
    let Some(doc) = store.get_document(&collection, &path)? else {
        eprintln!(
            "{} Document not found: qmd://{collection}/{path}",
            "Error:".red()
        );
        print_similar(&store, &path);
        std::process::exit(1);
    };

    let mut body = doc.body.unwrap_or_default();
    let start_line = from_line.unwrap_or(1);

    if from_line.is_some() || max_lines.is_some() {
        let lines: Vec<&str> = body.lines().collect();
        let start = start_line.saturating_sub(1);
        let end = max_lines.map_or(lines.len(), |n| (start + n).min(lines.len()));
        body = lines
            .get(start..end)
            .map(|s| s.join("\n"))
            .unwrap_or_default();
    }

    if line_numbers {
        body = add_line_numbers(&body, start_line);
    }

    if let Some(ref ctx) = doc.context {
        println!("Folder Context: {ctx}\n---\n");
    }
    println!("{body}");
    Ok(())
}

/// Handle multi-get command.
fn handle_multi_get(
    pattern: &str,
    max_lines: Option<usize>,
    max_bytes: usize,
    format: &OutputFormat,
) -> Result<()> {
    let store = Store::new()?;

    // Comma-separated list or glob.
    let is_comma_list = pattern.contains(',') && !pattern.contains('*') && !pattern.contains('?');
    let mut results: Vec<(qmd::DocumentResult, bool, Option<String>)> = Vec::new();

    let apply_limit = |body: &mut Option<String>| {
        if let Some(limit) = max_lines
            && let Some(text) = body
        {
            let lines: Vec<&str> = text.lines().take(limit).collect();
            *text = lines.join("\n");
        }
    };

    if is_comma_list {
        for name in pattern.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Ok((collection, path)) = resolve_reference(&store, name) else {
                eprintln!("Invalid path format: {name}");
                continue;
            };
            match store.get_document(&collection, &path)? {
                Some(mut doc) => {
                    if doc.body_length > max_bytes {
                        let reason = format!(
                            "File too large ({}KB > {}KB)",
                            doc.body_length / 1024,
                            max_bytes / 1024
                        );
                        doc.body = None;
                        results.push((doc, true, Some(reason)));
                    } else {
                        apply_limit(&mut doc.body);
                        results.push((doc, false, None));
                    }
                }
                None => eprintln!("File not found: {name}"),
            }
        }
    } else {
        let matched = match_files_by_glob(&store, pattern)?;
        if matched.is_empty() {
            eprintln!("No files matched pattern: {pattern}");
            std::process::exit(1);
        }

        for doc in matched {
            if doc.body_length > max_bytes {
                let reason = format!(
                    "File too large ({}KB > {}KB). Use 'qmd get {}' to retrieve.",
                    doc.body_length / 1024,
                    max_bytes / 1024,
                    doc.display_path
                );
                results.push((doc, true, Some(reason)));
            } else if let Some(mut full_doc) =
                store.get_document(&doc.collection_name, &doc.path)?
            {
                apply_limit(&mut full_doc.body);
                results.push((full_doc, false, None));
            }
        }
    }

    format_documents(&results, format);
    Ok(())
}

/// Handle status command.
fn handle_status() -> Result<()> {
    let store = Store::new()?;
    let db_path = store.db_path().to_string_lossy().to_string();
    let index_size = fs::metadata(store.db_path()).map_or(0, |m| m.len() as usize);

    let status = store.get_status()?;
    let contexts = store.list_all_contexts()?;

    println!("{}\n", "QMD Status".bold());
    println!("Index: {db_path}");
    println!("Size:  {}\n", format_bytes(index_size));

    println!("{}", "Documents".bold());
    println!("  Total:    {} files indexed", status.total_documents);
    println!(
        "  Vectors:  {}",
        if status.has_vector_index { "yes" } else { "no" }
    );
    if status.needs_embedding > 0 {
        println!(
            "  {} {}",
            "Pending:".yellow(),
            format!("{} need embedding (run 'qmd embed')", status.needs_embedding)
        );
    }

    if status.collections.is_empty() {
        println!(
            "\n{}",
            "No collections. Run 'qmd collection add .' to index markdown files.".dimmed()
        );
        return Ok(());
    }

    println!("\n{}", "Collections".bold());
    for coll in &status.collections {
        let time_ago = coll
            .last_modified
            .as_ref()
            .map_or_else(|| "never".to_string(), |t| format_time_ago(t));
        let coll_contexts: Vec<_> = contexts
            .iter()
            .filter(|c| c.collection == coll.name)
            .collect();

        println!(
            "  {} {}",
            coll.name.cyan(),
            format!("(qmd://{}/)", coll.name).dimmed()
        );
        println!("    {} {}", "Pattern:".dimmed(), coll.glob_pattern);
        println!(
            "    {} {} (updated {})",
            "Files:".dimmed(),
            coll.active_count,
            time_ago
        );

        if !coll_contexts.is_empty() {
            println!("    {} {}", "Contexts:".dimmed(), coll_contexts.len());
            for ctx in coll_contexts {
                let path_display = if ctx.path.is_empty() {
                    "/".to_string()
                } else {
                    format!("/{}", ctx.path)
                };
                let preview: String = if ctx.context.chars().count() > 60 {
                    format!("{}...", ctx.context.chars().take(57).collect::<String>())
                } else {
                    ctx.context.clone()
                };
                println!("      {} {}", format!("{path_display}:").dimmed(), preview);
            }
        }
    }

    Ok(())
}

/// Handle update command: clear the cache and reindex every collection.
fn handle_update() -> Result<()> {
    let store = Store::new()?;
    store.clear_cache()?;

    let collections = store.list_collections()?;
    if collections.is_empty() {
        println!(
            "{}",
            "No collections found. Run 'qmd collection add .' to index markdown files.".dimmed()
        );
        return Ok(());
    }

    println!(
        "{}\n",
        format!("Updating {} collection(s)...", collections.len()).bold()
    );

    for (i, coll) in collections.iter().enumerate() {
        println!(
            "{} {} {}",
            format!("[{}/{}]", i + 1, collections.len()).cyan(),
            coll.name.bold(),
            format!("({})", coll.glob_pattern).dimmed()
        );
        match run_index(&store, &coll.pwd, &coll.glob_pattern) {
            Ok(result) => println!(
                "  {} indexed, {} updated, {} unchanged, {} removed",
                result.indexed, result.updated, result.unchanged, result.removed
            ),
            Err(e) => eprintln!("  {} {e}", "Warning:".yellow()),
        }
        println!();
    }

    println!("{} All collections updated.", "✓".green());
    Ok(())
}

/// Handle search command.
fn handle_search(
    query: &str,
    collection: Option<String>,
    limit: usize,
    min_score: Option<f64>,
    full: bool,
    format: &OutputFormat,
) -> Result<()> {
    let store = Store::new()?;
    let llm = Ollama::from_env();
    let engine = SearchEngine::new(&store, &llm);

    let mut results = engine.search_fts(
        query,
        &SearchOptions {
            collection,
            limit,
            min_score,
        },
    )?;
    load_bodies(&store, &mut results, full)?;
    format_search_results(&results, format, full);
    Ok(())
}

/// Handle vector search command.
fn handle_vsearch(
    query: &str,
    collection: Option<String>,
    limit: usize,
    min_score: Option<f64>,
    full: bool,
    format: &OutputFormat,
    model: Option<&str>,
) -> Result<()> {
    let store = Store::new()?;
    let llm = Ollama::from_env();
    let engine = match model {
        Some(m) => SearchEngine::with_models(
            &store,
            &llm,
            m,
            qmd::config::get_query_model(),
            qmd::config::get_rerank_model(),
        ),
        None => SearchEngine::new(&store, &llm),
    };

    if !store.has_vector_table()? {
        println!("No vector index. Run 'qmd embed' to generate embeddings first.");
        return Ok(());
    }

    let mut results = engine.search_vector(
        query,
        &SearchOptions {
            collection,
            limit,
            min_score,
        },
    )?;

    if results.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    load_bodies(&store, &mut results, full)?;
    format_search_results(&results, format, full);
    Ok(())
}

/// Handle query command (hybrid search).
#[allow(clippy::too_many_arguments)]
fn handle_query(
    query: &str,
    collection: Option<String>,
    limit: usize,
    min_score: Option<f64>,
    full: bool,
    no_expand: bool,
    no_rerank: bool,
    format: &OutputFormat,
) -> Result<()> {
    let store = Store::new()?;
    let llm = Ollama::from_env();
    let engine = SearchEngine::new(&store, &llm);

    let mut results = engine.search_hybrid(
        query,
        &HybridOptions {
            collection,
            limit,
            min_score,
            expand: !no_expand,
            rerank: !no_rerank,
        },
    )?;
    load_bodies(&store, &mut results, full)?;
    format_search_results(&results, format, full);
    Ok(())
}

/// Fill in bodies when full output was requested.
fn load_bodies(store: &Store, results: &mut [qmd::SearchResult], full: bool) -> Result<()> {
    if !full {
        return Ok(());
    }
    for result in results.iter_mut() {
        if result.doc.body.is_none()
            && let Some(doc) = store.get_document(&result.doc.collection_name, &result.doc.path)?
        {
            result.doc.body = doc.body;
        }
    }
    Ok(())
}

/// Handle expand command.
fn handle_expand(query: &str) -> Result<()> {
    let store = Store::new()?;
    let llm = Ollama::from_env();
    let engine = SearchEngine::new(&store, &llm);

    println!("{}\n", "Query Expansion".bold());
    println!("Original: {query}\n");

    let queries = engine.expand_query(query)?;
    if queries.len() == 1 {
        println!(
            "{}",
            "No expansions (model unavailable or no usable output).".dimmed()
        );
        return Ok(());
    }

    println!("{}", "Expanded queries:".cyan());
    for q in &queries[1..] {
        println!("  {q}");
    }
    Ok(())
}

/// Handle embed command with progress display.
fn handle_embed(force: bool, model: Option<&str>) -> Result<()> {
    use std::io::Write;
    use std::time::Instant;

    let store = Store::new()?;
    let llm = Ollama::from_env();
    let model = model
        .map(str::to_string)
        .unwrap_or_else(qmd::config::get_embed_model);

    let pending = store.get_hashes_needing_embedding(&model)?;
    if pending.is_empty() && !force {
        println!("{} All documents already have embeddings.", "✓".green());
        return Ok(());
    }

    println!(
        "{} {} {}",
        "Embedding".bold(),
        format!("{} documents", pending.len()).bold(),
        format!("(model {model})").dimmed()
    );

    let progress = Progress::new();
    progress.indeterminate();
    let _cursor = Cursor::hide_guard();
    let start_time = Instant::now();

    let mut cb = |p: &qmd::EmbedProgress| {
        let percent = (p.bytes_processed as f64 / p.total_bytes.max(1) as f64) * 100.0;
        progress.set(percent);

        let elapsed = start_time.elapsed().as_secs_f64();
        let bytes_per_sec = p.bytes_processed as f64 / elapsed.max(0.001);
        let remaining = p.total_bytes.saturating_sub(p.bytes_processed) as f64;
        let eta = if elapsed > 2.0 {
            format_eta(remaining / bytes_per_sec)
        } else {
            "...".to_string()
        };
        let err_str = if p.errors > 0 {
            format!(" {} err", p.errors).yellow().to_string()
        } else {
            String::new()
        };

        eprint!(
            "\r{} {} {}/{}{} {} ETA {}   ",
            render_progress_bar(percent, 20).cyan(),
            format!("{percent:3.0}%").bold(),
            p.chunks_done,
            p.total_chunks,
            err_str,
            format!("{}/s", format_bytes(bytes_per_sec as usize)).dimmed(),
            eta.dimmed()
        );
        std::io::stderr().flush().ok();
    };

    let result = embed_documents(&store, &llm, &model, force, Some(&mut cb))?;
    progress.clear();

    if result.cleared > 0 {
        eprintln!("\rCleared {} existing embeddings", result.cleared);
    }

    let total_time = start_time.elapsed().as_secs_f64();
    println!(
        "\r{} Embedded {} chunks from {} documents in {}          ",
        "✓".green(),
        result.chunks_embedded.to_string().bold(),
        result.documents.to_string().bold(),
        format_eta(total_time).bold()
    );
    if result.errors > 0 {
        println!("{} {} chunks failed", "⚠".yellow(), result.errors);
    }
    if result.skipped_empty > 0 {
        println!(
            "{}",
            format!("{} empty documents skipped", result.skipped_empty).dimmed()
        );
    }

    Ok(())
}

/// Handle models subcommands.
fn handle_models(cmd: ModelCommands) -> Result<()> {
    use qmd::LlmProvider;

    let llm = Ollama::from_env();

    match cmd {
        ModelCommands::List => {
            println!("{}\n", "Configured Models".bold());
            let configured = [
                ("embed", qmd::config::get_embed_model()),
                ("query", qmd::config::get_query_model()),
                ("rerank", qmd::config::get_rerank_model()),
            ];
            for (role, name) in configured {
                match llm.model_exists(&name) {
                    Ok(info) if info.exists => {
                        let size = info
                            .size
                            .map(|s| format!(" ({})", format_bytes(s as usize)))
                            .unwrap_or_default();
                        println!("  {role}: {} {}{size}", name.cyan(), "available".green());
                    }
                    Ok(_) => {
                        println!(
                            "  {role}: {} {} (run 'qmd models pull {name}')",
                            name.cyan(),
                            "missing".red()
                        );
                    }
                    Err(e) => {
                        eprintln!("{} {e}", "Error:".red());
                        std::process::exit(1);
                    }
                }
            }
        }
        ModelCommands::Pull { model } => {
            let targets = if model == "all" {
                vec![
                    qmd::config::get_embed_model(),
                    qmd::config::get_query_model(),
                    qmd::config::get_rerank_model(),
                ]
            } else {
                vec![model]
            };

            for name in targets {
                println!("Pulling {}...", name.cyan());
                let mut last_status = String::new();
                let mut on_progress = |status: &str, completed: u64, total: u64| {
                    if total > 0 {
                        let percent = (completed as f64 / total as f64) * 100.0;
                        eprint!(
                            "\r  {} {:3.0}%   ",
                            render_progress_bar(percent, 20),
                            percent
                        );
                    } else if status != last_status {
                        eprintln!("  {status}");
                        last_status = status.to_string();
                    }
                };
                match llm.pull_model(&name, Some(&mut on_progress)) {
                    Ok(true) => {
                        println!("\r{} {name} ready                          ", "✓".green());
                    }
                    Ok(false) => println!("\r{} {name} did not finish", "⚠".yellow()),
                    Err(e) => {
                        eprintln!("\r{} {e}", "Error:".red());
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Handle database maintenance commands.
fn handle_db(cmd: DbCommands) -> Result<()> {
    let store = Store::new()?;

    match cmd {
        DbCommands::Cleanup => {
            let inactive = store.delete_inactive_documents()?;
            let orphaned_content = store.cleanup_orphaned_content()?;
            let orphaned_vectors = store.cleanup_orphaned_vectors()?;

            println!("{} Database cleanup complete", "✓".green());
            println!("  Removed {inactive} inactive documents");
            println!("  Removed {orphaned_content} orphaned content entries");
            println!("  Removed {orphaned_vectors} orphaned vector entries");
        }
        DbCommands::Vacuum => {
            println!("Vacuuming database...");
            store.vacuum()?;
            println!("{} Database vacuumed", "✓".green());
        }
        DbCommands::ClearCache => {
            let cleared = store.clear_cache()?;
            println!("{} Cleared {} cached entries", "✓".green(), cleared);
        }
    }

    Ok(())
}

/// Handle cleanup command (cache + inactive + orphans + vacuum).
fn handle_cleanup() -> Result<()> {
    let store = Store::new()?;

    println!("{}\n", "Database Cleanup".bold());

    let cache_cleared = store.clear_cache()?;
    println!("{} Cleared {} cached entries", "✓".green(), cache_cleared);

    let inactive = store.delete_inactive_documents()?;
    if inactive > 0 {
        println!("{} Removed {} inactive documents", "✓".green(), inactive);
    }

    let orphaned_content = store.cleanup_orphaned_content()?;
    if orphaned_content > 0 {
        println!(
            "{} Removed {} orphaned content entries",
            "✓".green(),
            orphaned_content
        );
    }

    let orphaned_vectors = store.cleanup_orphaned_vectors()?;
    if orphaned_vectors > 0 {
        println!(
            "{} Removed {} orphaned vector entries",
            "✓".green(),
            orphaned_vectors
        );
    }

    store.vacuum()?;
    println!("{} Database vacuumed", "✓".green());

    println!("\n{} Cleanup complete", "✓".green());
    Ok(())
}
