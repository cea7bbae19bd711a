//! Integration tests for medlit
//!
//! These tests drive the orchestrator through mock adapters and a mock
//! E-utilities server, and check the MCP tool surface.

use medlit::config::Config;
use medlit::mcp::{McpServer, SearchDefaults, ToolRegistry};
use medlit::models::{
    AdapterErrorKind, DatabaseId, ExclusionSet, PatientSummary, Query, RawRecord,
    RawRecordBuilder, SearchOptions, SearchRequest, SearchStatus, Strategy,
};
use medlit::search::{OrchestratorSettings, QueryGenerator, SearchContext, SearchOrchestrator};
use medlit::sources::mock::make_record;
use medlit::sources::{MockSource, SourceError, SourceRegistry};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        adapter_timeout: Duration::from_millis(200),
        overall_timeout: Duration::from_secs(5),
        strategy_target: None,
    }
}

fn orchestrator(sources: Vec<MockSource>) -> SearchOrchestrator {
    let mut registry = SourceRegistry::new();
    for source in sources {
        registry.register(Arc::new(source));
    }
    SearchOrchestrator::new(Arc::new(registry), settings())
}

fn case(source: DatabaseId, id: &str, title: &str, abstract_text: &str) -> RawRecord {
    RawRecordBuilder::new(
        source,
        id,
        title,
        format!("http://example.com/{}/{}", source.id(), id),
    )
    .year(Some(2020))
    .abstract_text(abstract_text)
    .publication_type("Case Reports")
    .build()
}

fn tick_patient() -> PatientSummary {
    PatientSummary::new(["fever", "rash", "eschar"]).context(["Korea"])
}

fn fever_request() -> SearchRequest {
    SearchRequest::new(Query::from_text("fever AND rash"))
}

#[tokio::test]
async fn test_partial_failure_on_timeout() {
    let pubmed = MockSource::new(DatabaseId::PubMed).with_records(vec![
        make_record(DatabaseId::PubMed, "1", "Fever and rash in a farmer", Some(2021)),
        make_record(DatabaseId::PubMed, "2", "Scrub typhus with eschar", Some(2019)),
        make_record(DatabaseId::PubMed, "3", "Rash after tick bite", Some(2018)),
    ]);
    let pmc = MockSource::new(DatabaseId::Pmc)
        .with_records(vec![make_record(DatabaseId::Pmc, "PMC9", "Late answer", Some(2022))])
        .with_delay(Duration::from_secs(2));
    let koreamed = MockSource::new(DatabaseId::KoreaMed);

    let orchestrator = orchestrator(vec![pubmed, pmc, koreamed]);
    let ctx = SearchContext::new(tick_patient(), ExclusionSet::default());
    let result = orchestrator.search_all(&fever_request(), &ctx).await.unwrap();

    assert_eq!(result.status, SearchStatus::Partial);
    assert_eq!(result.records.len(), 3);
    assert!(result
        .records
        .iter()
        .all(|r| r.record.source == DatabaseId::PubMed));
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].source, DatabaseId::Pmc);
    assert_eq!(result.errors[0].kind, AdapterErrorKind::Timeout);
}

#[tokio::test]
async fn test_search_is_idempotent_for_fixed_responses() {
    let records = vec![
        case(DatabaseId::PubMed, "1", "Fever and rash", "A farmer with fever and rash."),
        case(DatabaseId::PubMed, "2", "Eschar in Korea", "Eschar found in a Korean patient."),
        case(DatabaseId::PubMed, "3", "Unrelated fracture", "A tibial fracture."),
    ];
    let orchestrator = orchestrator(vec![
        MockSource::new(DatabaseId::PubMed).with_records(records),
        MockSource::new(DatabaseId::Pmc),
        MockSource::new(DatabaseId::KoreaMed),
    ]);
    let ctx = SearchContext::new(tick_patient(), ExclusionSet::default());

    let first = orchestrator.search_all(&fever_request(), &ctx).await.unwrap();
    let second = orchestrator.search_all(&fever_request(), &ctx).await.unwrap();

    assert_eq!(first.records, second.records);
    assert_eq!(first.status, second.status);
    assert_eq!(first.database_counts, second.database_counts);
}

#[tokio::test]
async fn test_duplicates_across_databases_collapse() {
    let shared = "Scrub typhus presenting with fever and eschar";
    let orchestrator = orchestrator(vec![
        MockSource::new(DatabaseId::PubMed)
            .with_records(vec![make_record(DatabaseId::PubMed, "111", shared, Some(2020))]),
        MockSource::new(DatabaseId::Pmc).with_records(vec![make_record(
            DatabaseId::Pmc,
            "PMC111",
            "Scrub Typhus Presenting With Fever and Eschar.",
            Some(2020),
        )]),
        MockSource::new(DatabaseId::KoreaMed).with_records(vec![make_record(
            DatabaseId::KoreaMed,
            "K1",
            "Hantavirus infection in a soldier",
            Some(2017),
        )]),
    ]);
    let ctx = SearchContext::new(tick_patient(), ExclusionSet::default());
    let result = orchestrator.search_all(&fever_request(), &ctx).await.unwrap();

    assert_eq!(result.status, SearchStatus::Complete);
    assert_eq!(result.records.len(), 2);

    let keys: HashSet<_> = result
        .records
        .iter()
        .map(|r| medlit::utils::normalize_title(&r.record.title))
        .collect();
    assert_eq!(keys.len(), result.records.len());
}

#[tokio::test]
async fn test_excluded_diagnoses_never_appear() {
    let orchestrator = orchestrator(vec![
        MockSource::new(DatabaseId::PubMed).with_records(vec![
            case(DatabaseId::PubMed, "1", "Fever and rash", "Final diagnosis was scrub typhus."),
            case(DatabaseId::PubMed, "2", "Fever and malar rash", "Systemic Lupus Erythematosus flare."),
        ]),
        MockSource::new(DatabaseId::Pmc).with_records(vec![case(
            DatabaseId::Pmc,
            "PMC2",
            "Lupus nephritis with rash",
            "",
        )]),
    ]);
    let ctx = SearchContext::new(
        tick_patient(),
        ExclusionSet::with_diagnoses(["systemic lupus erythematosus", "lupus"]),
    );
    let request = fever_request().databases([DatabaseId::PubMed, DatabaseId::Pmc]);
    let result = orchestrator.search_all(&request, &ctx).await.unwrap();

    assert_eq!(result.excluded_count, 2);
    assert_eq!(result.records.len(), 1);
    for scored in &result.records {
        assert!(!scored.record.searchable_text().to_lowercase().contains("lupus"));
    }
}

#[tokio::test]
async fn test_per_database_cap() {
    let many = |source: DatabaseId| {
        (0..10)
            .map(|i| {
                make_record(
                    source,
                    &format!("{}-{}", source.id(), i),
                    &format!("Distinct {} case number {}", source.id(), i),
                    Some(1990 + i + 10 * i32::from(source.priority())),
                )
            })
            .collect::<Vec<_>>()
    };
    let orchestrator = orchestrator(vec![
        MockSource::new(DatabaseId::PubMed).with_records(many(DatabaseId::PubMed)),
        MockSource::new(DatabaseId::Pmc).with_records(many(DatabaseId::Pmc)),
        MockSource::new(DatabaseId::KoreaMed).with_records(many(DatabaseId::KoreaMed)),
    ]);
    let request = fever_request()
        .max_results_per_db(3)
        .max_results_for(DatabaseId::KoreaMed, 1);
    let result = orchestrator
        .search_all(&request, &SearchContext::default())
        .await
        .unwrap();

    assert_eq!(result.database_counts[&DatabaseId::PubMed], 3);
    assert_eq!(result.database_counts[&DatabaseId::Pmc], 3);
    assert_eq!(result.database_counts[&DatabaseId::KoreaMed], 1);
    assert_eq!(result.records.len(), 7);
}

#[tokio::test]
async fn test_broad_to_narrow_keeps_going_on_weak_results() {
    let weak = vec![
        make_record(DatabaseId::PubMed, "1", "Tibial fracture in a runner", Some(2020)),
        make_record(DatabaseId::PubMed, "2", "Dental caries survey", Some(2019)),
        make_record(DatabaseId::PubMed, "3", "Knee arthroplasty outcomes", Some(2018)),
        make_record(DatabaseId::PubMed, "4", "Cataract surgery review", Some(2017)),
        make_record(DatabaseId::PubMed, "5", "Asthma inhaler adherence", Some(2016)),
    ];
    let pubmed = Arc::new(MockSource::new(DatabaseId::PubMed).with_records(weak));
    let mut registry = SourceRegistry::new();
    registry.register(pubmed.clone());
    let orchestrator = SearchOrchestrator::new(Arc::new(registry), settings());

    let ctx = SearchContext::new(tick_patient(), ExclusionSet::default());
    let options = SearchOptions {
        databases: [DatabaseId::PubMed].into_iter().collect(),
        ..Default::default()
    };
    let result = orchestrator
        .search_with_strategy(&ctx, Strategy::BroadToNarrow, &options)
        .await
        .unwrap();

    assert!(result.rounds.len() >= 2);
    assert!(pubmed.call_count() >= 2);
    assert!(result.records.iter().all(|r| r.score < 50));

    // Broadest first: priorities are issued in descending order
    let priorities: Vec<u32> = result.queries_issued().iter().map(|q| q.priority).collect();
    let mut sorted = priorities.clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(priorities, sorted);
}

#[tokio::test]
async fn test_strategy_search_stays_within_cap() {
    let patient = tick_patient();
    let queries = QueryGenerator::new()
        .generate(&patient, &Default::default())
        .unwrap();

    let mut pubmed = MockSource::new(DatabaseId::PubMed);
    for query in &queries {
        let p = query.priority;
        pubmed = pubmed.with_query_response(
            query.text.clone(),
            vec![
                make_record(DatabaseId::PubMed, &format!("{}-1", p), &format!("Hip fracture cohort {}", p), Some(2015)),
                make_record(DatabaseId::PubMed, &format!("{}-2", p), &format!("Glaucoma screening {}", p), Some(2016)),
            ],
        );
    }
    let orchestrator = orchestrator(vec![pubmed]);

    let options = SearchOptions {
        databases: [DatabaseId::PubMed].into_iter().collect(),
        max_results_per_db: 2,
        ..Default::default()
    };
    let ctx = SearchContext::new(patient, ExclusionSet::default());
    let result = orchestrator
        .search_with_strategy(&ctx, Strategy::BroadToNarrow, &options)
        .await
        .unwrap();

    assert!(result.rounds.len() >= 2);
    assert!(result.records.len() <= options.max_results_per_db * options.databases.len());

    let multi = orchestrator
        .search_with_multiple_queries(
            &queries.iter().map(|q| q.text.clone()).collect::<Vec<_>>(),
            &ctx,
            &options,
        )
        .await
        .unwrap();
    assert_eq!(multi.rounds.len(), queries.len());
    assert!(multi.records.len() <= 2);
}

#[tokio::test]
async fn test_empty_result_is_not_an_error() {
    let orchestrator = orchestrator(vec![
        MockSource::new(DatabaseId::PubMed),
        MockSource::new(DatabaseId::Pmc),
        MockSource::new(DatabaseId::KoreaMed),
    ]);
    let result = orchestrator
        .search_all(&fever_request(), &SearchContext::default())
        .await
        .unwrap();

    assert_eq!(result.status, SearchStatus::Complete);
    assert!(result.is_empty());
    assert!(result.errors.is_empty());
    assert!(result.no_results.is_some());
}

#[tokio::test]
async fn test_all_adapters_failing() {
    let orchestrator = orchestrator(vec![
        MockSource::new(DatabaseId::PubMed).with_error(SourceError::Network("refused".into())),
        MockSource::new(DatabaseId::Pmc).with_error(SourceError::Server {
            status: 503,
            message: "unavailable".into(),
        }),
        MockSource::new(DatabaseId::KoreaMed)
            .with_error(SourceError::Parse("unexpected page layout".into())),
    ]);
    let result = orchestrator
        .search_all(&fever_request(), &SearchContext::default())
        .await
        .unwrap();

    assert_eq!(result.status, SearchStatus::AllFailed);
    assert!(result.records.is_empty());
    assert_eq!(result.errors.len(), 3);

    let kinds: HashSet<_> = result.errors.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&AdapterErrorKind::Unreachable));
    assert!(kinds.contains(&AdapterErrorKind::Malformed));
}

mod pubmed_http {
    use super::*;
    use mockito::Matcher;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const ESEARCH: &str = r#"{"header":{"type":"esearch"},"esearchresult":{"count":"1",
        "idlist":["31000001"],"querytranslation":"\"fever\"[Title/Abstract] AND \"rash\"[Title/Abstract]"}}"#;

    const EFETCH: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="MEDLINE" Owner="NLM">
      <PMID Version="1">31000001</PMID>
      <Article PubModel="Print">
        <Journal>
          <JournalIssue CitedMedium="Print">
            <PubDate><Year>2019</Year></PubDate>
          </JournalIssue>
          <Title>Infection and Chemotherapy</Title>
        </Journal>
        <ArticleTitle>Fever and <i>rash</i> with eschar in a Korean farmer.</ArticleTitle>
        <Abstract>
          <AbstractText>A 62-year-old farmer presented with fever, rash and an eschar. Scrub typhus was confirmed.</AbstractText>
        </Abstract>
        <PublicationTypeList>
          <PublicationType UI="D002363">Case Reports</PublicationType>
        </PublicationTypeList>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    fn pubmed_only(endpoint: String) -> SearchOrchestrator {
        let mut config = Config::default();
        config.sources.pubmed.endpoint = endpoint;
        config.sources.pmc.enabled = false;
        config.sources.koreamed.enabled = false;
        config.search.retry_attempts = 1;

        let registry = SourceRegistry::from_config(&config).unwrap();
        SearchOrchestrator::new(Arc::new(registry), OrchestratorSettings::from_config(&config))
    }

    /// E-utilities stand-in whose first connection never gets an answer
    async fn stalling_eutils(body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();

        tokio::spawn(async move {
            let mut stalled = Vec::new();
            while let Ok((mut socket, _)) = listener.accept().await {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    stalled.push(socket);
                    continue;
                }
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 16 * 1024];
                    let mut read = 0;
                    while read < buf.len() {
                        let n = socket.read(&mut buf[read..]).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        read += n;
                        if buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });

        (format!("http://{}", addr), connections)
    }

    #[tokio::test]
    async fn test_hung_attempt_retried_within_adapter_budget() {
        const EMPTY_ESEARCH: &str = r#"{"esearchresult":{"count":"0","idlist":[],
            "querytranslation":"\"fever\"[Title/Abstract]"}}"#;
        let (endpoint, connections) = stalling_eutils(EMPTY_ESEARCH).await;

        let mut config = Config::default();
        config.sources.pubmed.endpoint = endpoint;
        config.sources.pubmed.requests_per_second = 50;
        config.sources.pmc.enabled = false;
        config.sources.koreamed.enabled = false;
        config.search.adapter_timeout_secs = 2;
        config.search.retry_attempts = 2;
        config.search.retry_initial_delay_ms = 10;
        assert!(config.request_timeout() < config.adapter_timeout() / 2);

        let registry = SourceRegistry::from_config(&config).unwrap();
        let orchestrator =
            SearchOrchestrator::new(Arc::new(registry), OrchestratorSettings::from_config(&config));
        let result = orchestrator
            .search_all(&request(), &SearchContext::default())
            .await
            .unwrap();

        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(result.status, SearchStatus::Complete);
        assert!(result.errors.is_empty());
        assert!(result.rounds[0].databases[&DatabaseId::PubMed]
            .query_translation
            .is_some());
    }

    fn request() -> SearchRequest {
        fever_request().databases([DatabaseId::PubMed])
    }

    #[tokio::test]
    async fn test_pubmed_end_to_end() {
        let mut server = mockito::Server::new_async().await;
        let esearch = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("db".into(), "pubmed".into()),
                Matcher::UrlEncoded("retmode".into(), "json".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(ESEARCH)
            .create_async()
            .await;
        let efetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::UrlEncoded("id".into(), "31000001".into()))
            .with_status(200)
            .with_header("content-type", "text/xml")
            .with_body(EFETCH)
            .create_async()
            .await;

        let orchestrator = pubmed_only(server.url());
        let ctx = SearchContext::new(tick_patient(), ExclusionSet::default());
        let result = orchestrator.search_all(&request(), &ctx).await.unwrap();

        esearch.assert_async().await;
        efetch.assert_async().await;

        assert_eq!(result.status, SearchStatus::Complete);
        assert_eq!(result.records.len(), 1);

        let top = &result.records[0];
        assert_eq!(top.record.id, "31000001");
        assert_eq!(top.record.year, Some(2019));
        assert_eq!(
            top.record.title,
            "Fever and rash with eschar in a Korean farmer."
        );
        assert!(top.score >= 75);
        assert!(top.matching_symptoms.contains(&"eschar".to_string()));

        let report = &result.rounds[0].databases[&DatabaseId::PubMed];
        assert!(report.query_translation.is_some());
        assert!(report
            .external_search_url
            .starts_with("https://pubmed.ncbi.nlm.nih.gov/?term="));
    }

    #[tokio::test]
    async fn test_pubmed_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let _esearch = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let orchestrator = pubmed_only(server.url());
        let result = orchestrator
            .search_all(&request(), &SearchContext::default())
            .await
            .unwrap();

        assert_eq!(result.status, SearchStatus::AllFailed);
        assert_eq!(result.errors[0].kind, AdapterErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn test_pubmed_bad_request_is_malformed() {
        let mut server = mockito::Server::new_async().await;
        let _esearch = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_status(400)
            .with_body("Bad Request")
            .create_async()
            .await;

        let orchestrator = pubmed_only(server.url());
        let result = orchestrator
            .search_all(&request(), &SearchContext::default())
            .await
            .unwrap();

        assert_eq!(result.status, SearchStatus::AllFailed);
        assert_eq!(result.errors[0].kind, AdapterErrorKind::Malformed);
    }
}

#[tokio::test]
async fn test_mcp_tool_listing() {
    let orchestrator = Arc::new(orchestrator(vec![MockSource::new(DatabaseId::PubMed)]));
    let server = McpServer::new(orchestrator.clone(), SearchDefaults::default()).unwrap();

    let mut names = server.tool_names().to_vec();
    names.sort();
    assert_eq!(
        names,
        vec![
            "generate_search_queries_only",
            "get_pubmed_query_guide",
            "get_query_examples",
            "search_all_databases",
            "search_with_multiple_queries",
            "search_with_strategy",
        ]
    );

    let registry = ToolRegistry::new(orchestrator, SearchDefaults::default());
    for tool in registry.all() {
        assert_eq!(tool.input_schema["type"], "object");
        assert!(!tool.description.is_empty());
    }
}

#[tokio::test]
async fn test_generate_queries_tool() {
    let orchestrator = Arc::new(orchestrator(vec![]));
    let registry = ToolRegistry::new(orchestrator, SearchDefaults::default());

    let value = registry
        .execute(
            "generate_search_queries_only",
            serde_json::json!({
                "patient_summary": {
                    "core_symptoms": ["fever", "rash"],
                    "context": ["Korea"]
                }
            }),
        )
        .await
        .unwrap();

    let queries = value["queries"].as_array().unwrap();
    assert!(!queries.is_empty());
    assert_eq!(queries[0]["priority"], 1);
}
