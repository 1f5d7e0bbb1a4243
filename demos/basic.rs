use contentstack_http::{ContentstackClient, ContentstackError};
use serde_json::{json, Value};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = ContentstackClient::from_env()?;

    let locales: Value = client
        .get_with_query("v3/locales", &[("include_count", "true")])
        .await?;
    println!("{locales:#}");

    let created = client
        .post::<_, Value>(
            "v3/locales",
            &json!({ "locale": { "code": "de-de", "fallback_locale": "en-us" } }),
        )
        .await;

    match created {
        Ok(locale) => println!("created {locale}"),
        Err(err @ ContentstackError::Remote { .. }) => {
            let diagnostic = err.diagnostic();
            eprintln!("{}\n{}", diagnostic.summary, diagnostic.detail);
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
