use ballot_client::{
    election::{
        partition,
        ElectionDraft,
    },
    mock::{
        DevChain,
        ACCESS_CONTROL_ADDRESS,
        ALICE,
        BOB,
        ELECTION_MANAGER_ADDRESS,
    },
    Authenticator,
    Config,
    Error,
};
use std::sync::Arc;

#[async_std::main]
async fn main() -> Result<(), Error> {
    env_logger::init();
    let chain = DevChain::new(ALICE);
    let config = Config::new(ACCESS_CONTROL_ADDRESS, ELECTION_MANAGER_ADDRESS);
    let auth = Authenticator::new(config, Some(Arc::new(chain.clone())));
    auth.mount().await?;

    let session = auth.connect().await?;
    println!("{} connected as {:?}", session.account, session.state());

    let elections = auth.aggregator();
    let now = chain.now();
    elections
        .create_election(&ElectionDraft::new(
            "Board".into(),
            "Annual board election".into(),
            ElectionDraft::parse_candidates("Alice, Bob"),
            now,
            now + 60,
        ))
        .await?;
    elections.submit_vote(1, 0).await?;

    chain.select_account(BOB);
    async_std::task::sleep(std::time::Duration::from_millis(50)).await;
    println!("switched to {:?}", auth.state());
    elections.submit_vote(1, 0).await?;

    chain.advance(61);
    let bob = auth.require_user()?;
    let loaded = elections.load_elections(Some(&bob)).await?;
    let buckets = partition(&loaded, chain.now());
    println!(
        "{} upcoming, {} live, {} expired",
        buckets.upcoming.len(),
        buckets.live.len(),
        buckets.expired.len()
    );
    let result = elections.election_results(1).await?;
    println!("{}", result.summary(1));

    auth.logout().await;
    Ok(())
}
