//! LanceDB backend: one table per collection, filtered on string columns.

use anyhow::{anyhow, Context};
use arrow_array::cast::AsArray;
use arrow_array::{Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use ragdb_core::config::Metric;
use ragdb_core::types::{is_zero_vector, Meta};

use super::schema::{build_chunk_schema, vector_dimension};
use super::{FilterField, MatchFilter, ScoredRecord, VectorBackend, VectorRecord};

pub struct LanceBackend {
    db: Connection,
    // Metric chosen at creation; lance does not persist it with the table.
    metrics: RwLock<HashMap<String, Metric>>,
}

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// SQL predicate for a [`MatchFilter`]. An empty value set matches nothing.
pub fn predicate(filter: &MatchFilter) -> String {
    if filter.any_of.is_empty() {
        return "false".to_string();
    }
    let values = filter.any_of.iter().map(|v| quote(v)).collect::<Vec<_>>().join(",");
    format!("{} IN ({values})", filter.field.column())
}

fn distance_type(metric: Metric) -> DistanceType {
    match metric {
        Metric::Cosine => DistanceType::Cosine,
        Metric::Ip => DistanceType::Dot,
        Metric::L2 => DistanceType::L2,
    }
}

fn distance_to_score(metric: Metric, distance: f32) -> f32 {
    match metric {
        Metric::Cosine | Metric::Ip => 1.0 - distance,
        Metric::L2 => 1.0 / (1.0 + distance),
    }
}

/// Orders one page of nearest rows: rows with signal by score, then
/// zero-vector rows with score 0 (lance gives them an arbitrary distance).
///
/// `Err(limit)` asks for a wider page: zero rows took slots that rows with
/// signal further down could fill.
fn settle(rows: Vec<ScoredRecord>, top_k: usize, limit: usize) -> Result<Vec<ScoredRecord>, usize> {
    let fetched = rows.len();
    let (mut signal, blank): (Vec<ScoredRecord>, Vec<ScoredRecord>) =
        rows.into_iter().partition(|hit| !is_zero_vector(&hit.record.vector));
    if signal.len() < top_k && fetched >= limit {
        return Err(limit + blank.len());
    }
    signal.sort_by(|a, b| b.score.total_cmp(&a.score));
    signal.extend(blank.into_iter().map(|hit| ScoredRecord { score: 0.0, ..hit }));
    signal.truncate(top_k);
    Ok(signal)
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> anyhow::Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow!("missing {name} column"))
}

fn rows_from_batch(batch: &RecordBatch) -> anyhow::Result<Vec<(VectorRecord, Option<f32>)>> {
    let chunk_ids = string_column(batch, "chunk_id")?;
    let kb_ids = string_column(batch, "kb_id")?;
    let doc_ids = string_column(batch, "doc_id")?;
    let contents = string_column(batch, "content")?;
    let metadata = string_column(batch, "metadata")?;
    let vectors = batch
        .column_by_name("vector")
        .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
        .ok_or_else(|| anyhow!("missing vector column"))?;
    let distances = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let vector = if vectors.is_null(i) {
            Vec::new()
        } else {
            vectors.value(i).as_primitive::<arrow_array::types::Float32Type>().values().iter().copied().collect()
        };
        let meta: Meta = serde_json::from_str(metadata.value(i)).unwrap_or_default();
        rows.push((
            VectorRecord {
                chunk_id: chunk_ids.value(i).to_string(),
                kb_id: kb_ids.value(i).to_string(),
                doc_id: doc_ids.value(i).to_string(),
                content: contents.value(i).to_string(),
                metadata: meta,
                vector,
            },
            distances.map(|d| d.value(i)),
        ));
    }
    Ok(rows)
}

fn records_to_batch(records: &[VectorRecord], dimension: i32) -> anyhow::Result<RecordBatch> {
    let schema = build_chunk_schema(dimension);
    let mut chunk_ids = Vec::new();
    let mut kb_ids = Vec::new();
    let mut doc_ids = Vec::new();
    let mut contents = Vec::new();
    let mut metadata = Vec::new();
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::new();
    for r in records {
        chunk_ids.push(r.chunk_id.clone());
        kb_ids.push(r.kb_id.clone());
        doc_ids.push(r.doc_id.clone());
        contents.push(r.content.clone());
        metadata.push(serde_json::to_string(&r.metadata)?);
        vectors.push(Some(r.vector.iter().map(|&x| Some(x)).collect()));
    }
    let batch = RecordBatch::try_new(
        schema,
        vec![
            Arc::new(StringArray::from(chunk_ids)),
            Arc::new(StringArray::from(kb_ids)),
            Arc::new(StringArray::from(doc_ids)),
            Arc::new(StringArray::from(contents)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                vectors.into_iter(),
                dimension,
            )),
        ],
    )?;
    Ok(batch)
}

impl LanceBackend {
    pub async fn connect(uri: &str) -> anyhow::Result<Self> {
        let db = connect(uri).execute().await?;
        Ok(Self { db, metrics: RwLock::new(HashMap::new()) })
    }

    async fn metric_of(&self, collection: &str) -> Metric {
        self.metrics.read().await.get(collection).copied().unwrap_or(Metric::Cosine)
    }

    async fn nearest(
        &self,
        table: &lancedb::Table,
        metric: Metric,
        vector: &[f32],
        limit: usize,
        filter: Option<&MatchFilter>,
    ) -> anyhow::Result<Vec<ScoredRecord>> {
        let mut query = table.vector_search(vector.to_vec())?.distance_type(distance_type(metric)).limit(limit);
        if let Some(f) = filter {
            query = query.only_if(predicate(f));
        }
        let mut stream = query.execute().await?;
        let mut hits = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            for (record, distance) in rows_from_batch(&batch)? {
                let score = distance.map_or(0.0, |d| distance_to_score(metric, d));
                hits.push(ScoredRecord { record, score });
            }
        }
        Ok(hits)
    }

    async fn open(&self, collection: &str) -> anyhow::Result<Option<lancedb::Table>> {
        if !self.has_collection(collection).await? {
            return Ok(None);
        }
        Ok(Some(self.db.open_table(collection).execute().await?))
    }
}

#[async_trait]
impl VectorBackend for LanceBackend {
    fn name(&self) -> &str {
        "lancedb"
    }

    async fn has_collection(&self, collection: &str) -> anyhow::Result<bool> {
        let names = self.db.table_names().execute().await?;
        Ok(names.iter().any(|n| n == collection))
    }

    async fn create_collection(&self, collection: &str, dimension: usize, metric: Metric) -> anyhow::Result<()> {
        self.metrics.write().await.insert(collection.to_string(), metric);
        if let Some(table) = self.open(collection).await? {
            let existing = vector_dimension(&table.schema().await?);
            if existing != Some(dimension) {
                return Err(anyhow!("collection {collection} exists with dimension {existing:?}, requested {dimension}"));
            }
            return Ok(());
        }
        let dim = i32::try_from(dimension).context("dimension too large")?;
        let schema = build_chunk_schema(dim);
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        self.db.create_table(collection, Box::new(iter)).execute().await?;
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> anyhow::Result<()> {
        if self.has_collection(collection).await? {
            self.db.drop_table(collection, &[]).await?;
        }
        self.metrics.write().await.remove(collection);
        Ok(())
    }

    async fn insert(&self, collection: &str, records: Vec<VectorRecord>) -> anyhow::Result<usize> {
        if records.is_empty() {
            return Ok(0);
        }
        let table = self.open(collection).await?.ok_or_else(|| anyhow!("collection {collection} does not exist"))?;
        let dimension = vector_dimension(&table.schema().await?).ok_or_else(|| anyhow!("table has no vector column"))?;
        let dim = i32::try_from(dimension).context("dimension too large")?;
        // upsert: drop previous rows with the same ids first
        let ids = MatchFilter::new(FilterField::ChunkId, records.iter().map(|r| r.chunk_id.clone()).collect());
        table.delete(&predicate(&ids)).await?;
        let batch = records_to_batch(&records, dim)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        table.add(reader).execute().await?;
        Ok(records.len())
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
        filter: Option<&MatchFilter>,
    ) -> anyhow::Result<Vec<ScoredRecord>> {
        let Some(table) = self.open(collection).await? else { return Ok(Vec::new()) };
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let metric = self.metric_of(collection).await;
        let mut limit = top_k;
        loop {
            let rows = self.nearest(&table, metric, vector, limit, filter).await?;
            match settle(rows, top_k, limit) {
                Ok(hits) => return Ok(hits),
                Err(wider) => limit = wider,
            }
        }
    }

    async fn delete(&self, collection: &str, filter: &MatchFilter) -> anyhow::Result<usize> {
        let Some(table) = self.open(collection).await? else { return Ok(0) };
        let pred = predicate(filter);
        let matching = table.count_rows(Some(pred.clone())).await?;
        if matching > 0 {
            table.delete(&pred).await?;
        }
        Ok(matching)
    }

    async fn count(&self, collection: &str, filter: Option<&MatchFilter>) -> anyhow::Result<usize> {
        let Some(table) = self.open(collection).await? else { return Ok(0) };
        Ok(table.count_rows(filter.map(predicate)).await?)
    }

    async fn scan(&self, collection: &str, filter: Option<&MatchFilter>) -> anyhow::Result<Vec<VectorRecord>> {
        let Some(table) = self.open(collection).await? else { return Ok(Vec::new()) };
        let mut query = table.query();
        if let Some(f) = filter {
            query = query.only_if(predicate(f));
        }
        let mut stream = query.execute().await?;
        let mut rows = Vec::new();
        while let Some(batch) = stream.try_next().await? {
            rows.extend(rows_from_batch(&batch)?.into_iter().map(|(record, _)| record));
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicate_escapes_quotes() {
        let f = MatchFilter::new(FilterField::KbId, vec!["a".into(), "o'brien".into()]);
        assert_eq!(predicate(&f), "kb_id IN ('a','o''brien')");
        assert_eq!(predicate(&MatchFilter::new(FilterField::DocId, vec![])), "false");
    }

    fn hit(id: &str, vector: Vec<f32>, score: f32) -> ScoredRecord {
        let record = VectorRecord {
            chunk_id: id.into(),
            kb_id: "kb".into(),
            doc_id: "doc".into(),
            content: id.into(),
            metadata: Meta::new(),
            vector,
        };
        ScoredRecord { record, score }
    }

    #[test]
    fn zero_vector_rows_rank_last() {
        let rows = vec![hit("blank", vec![0.0, 0.0], 0.99), hit("low", vec![0.0, 1.0], 0.2), hit("high", vec![1.0, 0.0], 0.8)];
        let settled = settle(rows, 3, 5).unwrap();
        let ids: Vec<&str> = settled.iter().map(|h| h.record.chunk_id.as_str()).collect();
        assert_eq!(ids, ["high", "low", "blank"]);
        assert_eq!(settled[2].score, 0.0);
    }

    #[test]
    fn full_page_with_zero_rows_asks_for_more() {
        let rows = vec![hit("blank", vec![0.0, 0.0], 0.99), hit("high", vec![1.0, 0.0], 0.8)];
        assert_eq!(settle(rows.clone(), 2, 2).unwrap_err(), 3);
        // a short page means the table is exhausted
        assert_eq!(settle(rows, 2, 4).unwrap().len(), 2);
    }
}
