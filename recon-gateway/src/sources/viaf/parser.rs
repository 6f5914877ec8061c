//! Handler table for VIAF SRU search responses

use super::cluster::{split_source_id, Cluster, NameEntry, NameSource, SourceIdMap};
use super::name_type_from_viaf_code;
use crate::parser::{HandlerTable, ParseState};

const RECORD: &str = "searchRetrieveResponse/records/record";
const CLUSTER: &str = "searchRetrieveResponse/records/record/recordData/VIAFCluster";

/// Scratch fields used while walking one record
#[derive(Debug, Default)]
pub struct ViafScratch {
    source_ids: SourceIdMap,
    nsid: Option<String>,
    name_entries: Vec<NameEntry>,
    entry: Option<NameEntry>,
    sources: Vec<NameSource>,
}

pub type ViafParseState = ParseState<Cluster, ViafScratch>;

fn cluster_path(suffix: &str) -> String {
    format!("{}/{}", CLUSTER, suffix)
}

/// Build the handler table for VIAF search results
pub fn handler_table() -> HandlerTable<Cluster, ViafScratch> {
    HandlerTable::<Cluster, ViafScratch>::new()
        .on_start(RECORD, |state, _| {
            state.current = Some(Cluster::default());
            state.scratch = ViafScratch::default();
        })
        .on_end(RECORD, |state| {
            if let Some(mut cluster) = state.current.take() {
                cluster.associate_source_ids(&state.scratch.source_ids);
                state.results.push(cluster);
            }
        })
        .capture(&cluster_path("viafID"), |state, text| {
            if let Some(cluster) = state.current.as_mut() {
                cluster.viaf_id = text.trim().to_string();
            }
        })
        .capture(&cluster_path("nameType"), |state, text| {
            if let Some(cluster) = state.current.as_mut() {
                cluster.name_type = name_type_from_viaf_code(text.trim());
            }
        })
        // sources: composite key -> institution record id
        .on_start(&cluster_path("sources"), |state, _| {
            state.scratch.source_ids.clear();
        })
        .on_start(&cluster_path("sources/source"), |state, attrs| {
            state.scratch.nsid = attrs.get("nsid").map(str::to_string);
            state.start_capture();
        })
        .on_end(&cluster_path("sources/source"), |state| {
            let key = state.take_text();
            if let Some(nsid) = state.scratch.nsid.take() {
                state.scratch.source_ids.insert(key.trim().to_string(), nsid);
            }
        })
        // mainHeadings: heading text -> institutions using it
        .on_start(&cluster_path("mainHeadings"), |state, _| {
            state.scratch.name_entries.clear();
        })
        .on_end(&cluster_path("mainHeadings"), |state| {
            let entries = std::mem::take(&mut state.scratch.name_entries);
            if let Some(cluster) = state.current.as_mut() {
                cluster.name_entries = entries;
            }
        })
        .on_start(&cluster_path("mainHeadings/data"), |state, _| {
            state.scratch.entry = Some(NameEntry::default());
        })
        .on_end(&cluster_path("mainHeadings/data"), |state| {
            if let Some(entry) = state.scratch.entry.take() {
                state.scratch.name_entries.push(entry);
            }
        })
        .capture(&cluster_path("mainHeadings/data/text"), |state, text| {
            if let Some(entry) = state.scratch.entry.as_mut() {
                entry.name = text.trim().to_string();
            }
        })
        .on_start(&cluster_path("mainHeadings/data/sources"), |state, _| {
            state.scratch.sources.clear();
        })
        .on_end(&cluster_path("mainHeadings/data/sources"), |state| {
            let sources = std::mem::take(&mut state.scratch.sources);
            if let Some(entry) = state.scratch.entry.as_mut() {
                entry.sources = sources;
            }
        })
        .capture(&cluster_path("mainHeadings/data/sources/s"), |state, text| {
            state.scratch.sources.push(NameSource::new(text.trim()));
        })
        .capture(&cluster_path("mainHeadings/data/sources/sid"), add_viaf_source_id)
}

/// `sid` holds "CODE|ID"; attach it to the source already listed under
/// `s`, or add the source if it was not
fn add_viaf_source_id(state: &mut ViafParseState, text: String) {
    let source_id = text.trim();
    let Some((code, _)) = split_source_id(source_id) else {
        tracing::debug!(sid = %source_id, "Ignoring malformed VIAF source id");
        return;
    };

    let sources = &mut state.scratch.sources;
    match sources.iter_mut().find(|s| s.code == code) {
        Some(existing) => existing.viaf_source_id = Some(source_id.to_string()),
        None => sources.push(NameSource::with_source_id(code, source_id)),
    }
}
