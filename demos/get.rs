use monoio_requests::Session;

#[monoio::main(enable_timer = true)]
async fn main() -> Result<(), monoio_requests::Error> {
    let mut session = Session::new();
    session
        .url("http://httpbin.org/get")
        .param("source", "monoio-requests")
        .keep_alive(true);

    let response = session.get().await?;
    println!("status: {} {}", response.status(), response.reason());
    for (name, value) in response.headers() {
        println!("  {}: {:?}", name, value);
    }
    println!("{}", response.text());

    // the second request adopts the parked socket
    let response = session.get().await?;
    println!("again: {}", response.status());

    Ok(())
}
