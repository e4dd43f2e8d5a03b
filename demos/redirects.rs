use monoio_requests::Session;

#[monoio::main(enable_timer = true)]
async fn main() -> Result<(), monoio_requests::Error> {
    let mut session = Session::new();
    session
        .url("http://httpbin.org/redirect/3")
        .redirect(true)
        .redirect_count(5)
        .throw_on_error(true);

    let response = session.get().await?;
    println!(
        "final: {} after {} redirects",
        response.status(),
        response.redirect_count()
    );
    for hop in response.redirects().iter() {
        println!("  {} -> {}", hop.request().uri(), hop.status());
    }

    Ok(())
}
