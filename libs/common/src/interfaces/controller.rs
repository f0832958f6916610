use alloy_sol_types::sol;

sol! {
    /// Links a token to its satellite contracts. Any of them may be the zero address.
    interface IAssetController {
        function ledger() external view returns (address);

        function sale() external view returns (address);

        function converter() external view returns (address);

        function distribution() external view returns (address);
    }
}
