use std::time::Instant;

/// Fires `N` concurrent `/admit` requests at a running server and reports
/// wall-clock throughput. A load-generation complement to `scheduler stress`,
/// which drives a similar workload in-process without the HTTP hop.
#[tokio::main]
async fn main() {
    let n: usize = std::env::var("N").ok().and_then(|v| v.parse().ok()).unwrap_or(200);
    let tenant_id = std::env::var("TENANT_ID").unwrap_or_else(|_| "tenant_a".into());
    let url = std::env::var("URL").unwrap_or_else(|_| "http://127.0.0.1:8080/admit".into());
    let client = reqwest::Client::new();
    let start = Instant::now();
    let mut tasks = Vec::new();
    for _ in 0..n {
        let c = client.clone();
        let tenant_id = tenant_id.clone();
        let u = url.clone();
        tasks.push(tokio::spawn(async move {
            let body = serde_json::json!({"tenant_id": tenant_id, "prompt_tokens": 100});
            let _ = c.post(&u).json(&body).send().await.ok();
        }));
    }
    for t in tasks {
        let _ = t.await;
    }
    println!("completed {} requests in {:.2}s", n, start.elapsed().as_secs_f32());
}
