//! Shared corpus fixtures for the end-to-end tests.

use alex::config::Config;
use alex::ingest::{Indexer, LinkIndexer};
use std::io::Cursor;
use std::path::Path;

pub fn test_config(root: &Path) -> Config {
    Config {
        index_root: root.to_path_buf(),
        num_shards: 4,
        num_link_shards: 2,
        result_limit: 30,
        ..Config::default()
    }
}

/// Build all three index families plus the snippet store under
/// `config.index_root`.
pub fn build_corpus(
    config: &Config,
    corpus_id: &str,
    doc_stream: &str,
    link_stream: &str,
) {
    let tokenizer = config.tokenizer();

    let mut indexer = Indexer::new(
        &config.index_root,
        config.num_shards,
        tokenizer.clone(),
        config.index_snippets,
    )
    .unwrap();
    indexer
        .add_stream(Cursor::new(doc_stream.trim_start().as_bytes()), corpus_id)
        .unwrap();
    let url_to_domain = indexer.commit().unwrap();

    let mut link_indexer = LinkIndexer::new(
        &config.index_root,
        config.num_link_shards,
        tokenizer,
        &url_to_domain,
    )
    .unwrap();
    link_indexer
        .add_stream(Cursor::new(link_stream.trim_start().as_bytes()))
        .unwrap();
    link_indexer.commit().unwrap();
}

/// Eight documents on eight domains; document 8 carries the rare words.
/// Columns: url, title, h1, meta, text.
pub fn test01_docs() -> String {
    let mut out = String::new();
    for i in 1..=8 {
        let text = if i == 8 {
            "plain body words more uniq"
        } else {
            "plain body words"
        };
        out.push_str(&format!(
            "http://url{i}.com/test\tTest page {i}\tTest h1 text\tMeta description text\t{text}\n"
        ));
    }
    out
}

/// One link to an indexed page, one to an unindexed page on an indexed
/// domain: the URL-link family sees 1 link, the domain-link family 2.
pub fn test01_links() -> String {
    "http://source1.com/page\thttp://url1.com/test\tUrl1.com test link\t1.0\n\
     http://source2.com/page\thttp://url1.com/other\tmore about url1.com\t1.0\n"
        .to_string()
}

/// Six documents on one domain plus two elsewhere, and fifteen inbound
/// links whose anchors match the domain query.
pub fn test06_docs() -> String {
    let mut out = String::new();
    out.push_str(
        "http://url1.com/test\tTest page 1\tTest h1 text\tMeta description text\tplain body words\n",
    );
    for i in 2..=6 {
        out.push_str(&format!(
            "http://url1.com/page{i}\tTest page {i}\tTest h1 text\tMeta description text\tplain body words\n"
        ));
    }
    for i in 7..=8 {
        out.push_str(&format!(
            "http://url{i}.com/test\tTest page {i}\tTest h1 text\tMeta description text\tplain body words\n"
        ));
    }
    out
}

pub fn test06_targets() -> Vec<String> {
    let mut targets = vec!["http://url1.com/test".to_string()];
    for i in 2..=6 {
        targets.push(format!("http://url1.com/page{i}"));
    }
    targets
}

pub fn test06_links() -> String {
    let targets = test06_targets();
    let mut out = String::new();
    for j in 1..=15 {
        let target = &targets[(j - 1) % targets.len()];
        out.push_str(&format!(
            "http://source{j}.com/page\t{target}\tUrl1.com inbound link\t1.0\n"
        ));
    }
    out
}
