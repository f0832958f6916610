use alloy_sol_types::sol;

sol! {
    interface ITokenFactory {
        /// Platform-native token, tracked alongside the issued ones
        function relqdToken() external view returns (address);

        function getNumTokens() external view returns (uint256);

        function tokens(uint256 index) external view returns (address);

        event TokenCreated(address tokenAddress);

        event TokenRemoved(address tokenAddress);
    }
}
