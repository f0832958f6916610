use alloy_sol_types::sol;

sol! {
    interface ISaleManager {
        function getNumSales() external view returns (uint256);

        /// `endTime` is exclusive, `rate` is wei per token
        function sales(uint256 index) external view returns (
            uint256 startTime,
            uint256 endTime,
            uint256 tokensToMint,
            uint256 rate,
            uint256 tokensRemaining,
            bool frozen
        );

        event SaleCreated(uint256 saleId, uint256 startTime, uint256 endTime, uint256 tokensToMint, uint256 rate);

        event SaleFrozen(uint256 indexed saleId);

        event SaleUnfrozen(uint256 indexed saleId);

        event PaymentReceived(uint256 indexed saleId, address indexed from, uint256 amountWei, uint256 amountTokens);
    }
}
