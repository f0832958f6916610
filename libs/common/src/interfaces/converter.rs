use alloy_sol_types::sol;

sol! {
    interface IConverter {
        /// Tokens received for `amountWei`
        function calcBuyAmount(uint256 amountWei) external view returns (uint256);

        /// Wei received for `amountTokens`
        function calcSellAmount(uint256 amountTokens) external view returns (uint256);

        event TokensPurchased(address indexed addr, uint256 amountWei, uint256 amountTokens);

        event TokensSold(address indexed addr, uint256 amountWei, uint256 amountTokens);

        event DepositReceived(address indexed from, uint256 amount);
    }
}
