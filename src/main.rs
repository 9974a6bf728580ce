use clap::{crate_version, App, Arg};
use url::Url;
use vellum::{Client, Method, Request};

#[tokio::main]
async fn main() {
    env_logger::init();

    let matches = App::new("vellum")
        .version(crate_version!())
        .arg(Arg::with_name("url").required(true).index(1))
        .get_matches();
    let url = Url::parse(matches.value_of("url").expect("missing url")).expect("invalid url");

    let client = Client::default();
    let request = Request::new(Method::Get, url);
    match client.execute(request).await {
        Ok(response) => {
            let status = response.status.code;
            let body = response.take_body().map(|mut b| b.take_bytes()).unwrap_or_default();
            println!("{status}");
            println!("{}", String::from_utf8_lossy(&body));
        }
        Err(err) => eprintln!("{err:#}"),
    }
}
