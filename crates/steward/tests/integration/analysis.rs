/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use std::sync::Arc;
use std::time::Duration;

use steward::models::analysis::PeriodType;
use steward::{MetricsError, OrchestrationError, RepositoryAnalyzer};
use steward_testing::{ActivityBuilder, FixedMetricsSource, MemoryStore};

use crate::fixtures::{at, REPOSITORY};

const HOUR: Duration = Duration::from_secs(3600);

fn analyzer(store: &Arc<MemoryStore>, source: &Arc<FixedMetricsSource>) -> RepositoryAnalyzer {
    RepositoryAnalyzer::new(store.clone(), source.clone(), PeriodType::Weekly, HOUR)
}

#[tokio::test]
async fn test_cache_hit_skips_the_source() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", Some(REPOSITORY));
    let source = Arc::new(FixedMetricsSource::new(ActivityBuilder::new().commits(3).build()));
    let analyzer = analyzer(&store, &source);

    let first = analyzer
        .get_analysis(project, at(2025, 6, 10, 9, 0))
        .await
        .expect("Failed to fetch analysis");
    let second = analyzer
        .get_analysis(project, at(2025, 6, 10, 9, 30))
        .await
        .expect("Failed to read cached analysis");

    assert_eq!(first, second);
    assert_eq!(first.unwrap().commits, 3);
    assert_eq!(source.calls(), 1);
    assert_eq!(store.cached_analyses().len(), 1);
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", Some(REPOSITORY));
    let source = Arc::new(FixedMetricsSource::new(ActivityBuilder::new().commits(3).build()));
    let analyzer = analyzer(&store, &source);

    analyzer.get_analysis(project, at(2025, 6, 10, 9, 0)).await.unwrap();
    source.set_activity(Some(ActivityBuilder::new().commits(8).build()));
    let later = analyzer
        .get_analysis(project, at(2025, 6, 10, 11, 0))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(later.commits, 8);
    assert_eq!(source.calls(), 2);
    assert_eq!(store.cached_analyses().len(), 1);
}

#[tokio::test]
async fn test_stale_entry_is_refetched() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", Some(REPOSITORY));
    let source = Arc::new(FixedMetricsSource::new(ActivityBuilder::new().build()));
    let analyzer = analyzer(&store, &source);

    analyzer.get_analysis(project, at(2025, 6, 10, 9, 0)).await.unwrap();
    assert_eq!(analyzer.mark_stale(project).await.unwrap(), 1);
    analyzer.get_analysis(project, at(2025, 6, 10, 9, 5)).await.unwrap();

    assert_eq!(source.calls(), 2);
    assert!(!store.cached_analyses()[0].is_stale);
}

#[tokio::test]
async fn test_project_without_repository_never_queries() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", None);
    let source = Arc::new(FixedMetricsSource::new(ActivityBuilder::new().commits(3).build()));

    let result = analyzer(&store, &source)
        .get_analysis(project, at(2025, 6, 10, 9, 0))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(source.calls(), 0);
    assert!(store.cached_analyses().is_empty());
}

#[tokio::test]
async fn test_source_with_no_data_caches_nothing() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", Some(REPOSITORY));
    let source = Arc::new(FixedMetricsSource::empty());

    let result = analyzer(&store, &source)
        .refresh(project, at(2025, 6, 10, 9, 0))
        .await
        .unwrap();

    assert!(result.is_none());
    assert_eq!(source.calls(), 1);
    assert!(store.cached_analyses().is_empty());
}

#[tokio::test]
async fn test_request_failure_surfaces_as_metrics_error() {
    let store = Arc::new(MemoryStore::new());
    let project = store.add_project("widgets", Some(REPOSITORY));
    let source = Arc::new(FixedMetricsSource::empty());
    source.fail_with("502 from upstream");

    let err = analyzer(&store, &source)
        .get_analysis(project, at(2025, 6, 10, 9, 0))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestrationError::Metrics(MetricsError::RequestFailed(_))
    ));
    assert_eq!(err.error_code(), "METRICS_ERROR");
}
