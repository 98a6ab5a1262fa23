//! S5 (§8): the configured `max_concurrent_llm_calls` bounds how many LLM
//! calls are ever in flight at once during the parallel section fan-out,
//! even though six sections are generated "simultaneously".

mod support;

use std::sync::Arc;

use repo_atlas::config::Config;
use repo_atlas::generate::build_generate_content_flow;
use repo_atlas::store::{keys, Store};

use support::{stub_llm_client, StubProvider};

#[tokio::test]
async fn concurrency_never_exceeds_the_configured_cap() {
    let mut config = Config::defaults();
    let provider = Arc::new(StubProvider::new(
        "- First finding about the system.\n- Second finding about the system.\n- Third finding about the system.\n",
    ));
    let cap = 2;
    let llm = stub_llm_client(&mut config, cap, provider.clone());

    let mut store: Store<repo_atlas::storage::InMemoryStorage> = Store::default();
    store.put(keys::CORE_MODULES, &Vec::<repo_atlas::types::ModuleDescriptor>::new()).unwrap();

    let flow = build_generate_content_flow(&config, llm, "widget", None);
    flow.run_once(&mut store).await.unwrap();

    assert!(
        provider.max_in_flight() <= cap,
        "observed {} calls in flight at once, configured cap was {cap}",
        provider.max_in_flight()
    );
    assert!(provider.call_count() >= 6, "expected at least the six section generators to call the model");
}
