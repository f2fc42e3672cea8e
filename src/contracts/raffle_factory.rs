use ethers::prelude::abigen;

abigen!(
    RaffleFactory,
    r#"[
        function getRaffles() external view returns (address[])
    ]"#
);
