use ethers::prelude::abigen;

abigen!(
    Raffle,
    r#"[
        function getRaffleInfo() external view returns (address, address, address, bool, uint256, uint256)
    ]"#
);
