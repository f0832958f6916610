use alloy_sol_types::sol;

sol! {
    interface IDistribution {
        event DistributionSent(uint256 indexed id, address indexed to, uint256 tokenBalance, uint256 amountSent);
    }
}
